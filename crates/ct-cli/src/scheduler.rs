//! HTCondor command lines and output parsing

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use ct_core::config::RemoteConfig;
use ct_core::{Endpoint, JobId, SessionError};
use ct_session::transport::shell_quote;
use ct_session::{SessionManager, Transport};

/// Pull the cluster id out of `condor_submit` output
///
/// `condor_submit` prints `N job(s) submitted to cluster C.`
pub fn parse_cluster_id(output: &str) -> Option<JobId> {
    static CLUSTER: OnceLock<Regex> = OnceLock::new();
    let re = CLUSTER.get_or_init(|| {
        Regex::new(r"submitted to cluster (\d+)").expect("valid regex")
    });
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| JobId::new(m.as_str()))
}

/// Command that submits `submit_file` from inside `remote_dir`
pub fn submit_argv(remote: &RemoteConfig, remote_dir: &str, submit_file: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cd {} && {} {}",
            shell_quote(remote_dir),
            remote.submit_command,
            shell_quote(submit_file)
        ),
    ]
}

/// Scheduler state of a job (`JobStatus` attribute)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    /// Not in the queue or history, or an unrecognised code
    Unknown,
}

impl JobState {
    /// Map a `JobStatus` code
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => JobState::Idle,
            "2" => JobState::Running,
            "3" => JobState::Removed,
            "4" => JobState::Completed,
            "5" => JobState::Held,
            "6" => JobState::TransferringOutput,
            "7" => JobState::Suspended,
            _ => JobState::Unknown,
        }
    }

    /// Whether the job will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Removed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "Idle",
            JobState::Running => "Running",
            JobState::Removed => "Removed",
            JobState::Completed => "Completed",
            JobState::Held => "Held",
            JobState::TransferringOutput => "TransferringOutput",
            JobState::Suspended => "Suspended",
            JobState::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

/// Current state of `job`: the queue first, then the history
pub async fn query_state<T: Transport>(
    sessions: &SessionManager<T>,
    endpoint: &Endpoint,
    remote: &RemoteConfig,
    job: &JobId,
    timeout: Duration,
) -> Result<JobState, SessionError> {
    let queue = vec![
        remote.queue_command.clone(),
        job.to_string(),
        "-af".to_string(),
        "JobStatus".to_string(),
    ];
    let out = sessions.execute(endpoint, &queue, timeout).await?;
    if let Some(code) = first_line(&out.stdout) {
        return Ok(JobState::from_code(code));
    }

    // Left the queue; ask the history
    let history = vec![
        remote.history_command.clone(),
        job.to_string(),
        "-limit".to_string(),
        "1".to_string(),
        "-af".to_string(),
        "JobStatus".to_string(),
    ];
    let out = sessions.execute(endpoint, &history, timeout).await?;
    Ok(first_line(&out.stdout)
        .map(JobState::from_code)
        .unwrap_or(JobState::Unknown))
}

fn first_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).find(|l| !l.is_empty())
}
