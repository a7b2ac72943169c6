//! Core error types for chtc-tools

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::Endpoint;

/// Errors raised by the session manager
///
/// Every variant names the endpoint, and where relevant the operation, so
/// callers can report which host failed and decide whether to retry.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The interactive authentication was rejected or aborted
    #[error("Authentication to {endpoint} failed: {reason}")]
    AuthenticationFailed { endpoint: Endpoint, reason: String },

    /// The shared channel could not be (re)established
    #[error("Channel to {endpoint} unavailable during {operation}: {reason}")]
    ChannelUnavailable {
        endpoint: Endpoint,
        operation: &'static str,
        reason: String,
    },

    /// The remote command ran and exited non-zero
    #[error("Remote command `{command}` on {endpoint} exited with code {exit_code}: {stderr}")]
    RemoteExecutionFailed {
        endpoint: Endpoint,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A path transfer failed; the destination may be partially written
    #[error("{operation} with {endpoint} failed: {reason}")]
    TransferFailed {
        endpoint: Endpoint,
        operation: &'static str,
        reason: String,
    },

    /// The operation exceeded its timeout; the channel itself is untouched
    #[error("{operation} on {endpoint} timed out after {timeout:?}")]
    Timeout {
        endpoint: Endpoint,
        operation: &'static str,
        timeout: Duration,
    },

    /// The operation was abandoned because the channel was disconnected
    #[error("{operation} on {endpoint} cancelled by disconnect")]
    Cancelled {
        endpoint: Endpoint,
        operation: &'static str,
    },

    /// Local session state (marker or lock file) could not be accessed
    #[error("Session state I/O error for {endpoint}: {source}")]
    Io {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// The endpoint this error refers to
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            SessionError::AuthenticationFailed { endpoint, .. }
            | SessionError::ChannelUnavailable { endpoint, .. }
            | SessionError::RemoteExecutionFailed { endpoint, .. }
            | SessionError::TransferFailed { endpoint, .. }
            | SessionError::Timeout { endpoint, .. }
            | SessionError::Cancelled { endpoint, .. }
            | SessionError::Io { endpoint, .. } => endpoint,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::AuthenticationFailed { .. }
                | SessionError::ChannelUnavailable { .. }
                | SessionError::TransferFailed { .. }
                | SessionError::Timeout { .. }
        )
    }
}

/// Correlation ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger file could not be appended to
    #[error("Failed to write ledger {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger file could not be read
    #[error("Failed to read ledger {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row could not be encoded
    #[error("Failed to encode ledger row: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Job submission errors
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The scheduler's output did not contain a job identifier
    #[error("Could not parse a job id from the submit output on {endpoint}: {output:?}")]
    SubmissionIdUnparseable { endpoint: Endpoint, output: String },

    /// The job description could not be used
    #[error("Invalid submit file {path:?}: {reason}")]
    InvalidSubmitFile { path: PathBuf, reason: String },

    /// Remote interaction failed before a job id was obtained
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
