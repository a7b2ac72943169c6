//! Process exit codes

use ct_core::{SessionError, SubmitError};

pub const SUCCESS: u8 = 0;
pub const FAILURE: u8 = 1;
/// Reserved for clap usage errors
pub const USAGE: u8 = 2;
pub const CHANNEL_UNAVAILABLE: u8 = 3;
pub const REMOTE_EXECUTION_FAILED: u8 = 4;
pub const AUTHENTICATION_FAILED: u8 = 5;
pub const SUBMISSION_ID_UNPARSEABLE: u8 = 6;

fn session_code(err: &SessionError) -> u8 {
    match err {
        SessionError::ChannelUnavailable { .. } => CHANNEL_UNAVAILABLE,
        SessionError::RemoteExecutionFailed { .. } => REMOTE_EXECUTION_FAILED,
        SessionError::AuthenticationFailed { .. } => AUTHENTICATION_FAILED,
        _ => FAILURE,
    }
}

/// Exit code for the first recognised error in the chain
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(session) = cause.downcast_ref::<SessionError>() {
            return session_code(session);
        }
        if let Some(submit) = cause.downcast_ref::<SubmitError>() {
            return match submit {
                SubmitError::SubmissionIdUnparseable { .. } => SUBMISSION_ID_UNPARSEABLE,
                SubmitError::Session(session) => session_code(session),
                SubmitError::InvalidSubmitFile { .. } => FAILURE,
            };
        }
    }
    FAILURE
}
