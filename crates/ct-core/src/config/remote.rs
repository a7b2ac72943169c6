//! Remote scheduler configuration

use serde::{Deserialize, Serialize};

/// How jobs are laid out and submitted on the access point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote directory (relative to the login directory) that holds job directories
    pub workdir: String,

    /// Submit command, invoked as `<submit_command> <submit file>`
    pub submit_command: String,

    /// Queue query command
    pub queue_command: String,

    /// History query command for jobs that have left the queue
    pub history_command: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            workdir: "chtc-jobs".to_string(),
            submit_command: "condor_submit".to_string(),
            queue_command: "condor_q".to_string(),
            history_command: "condor_history".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Remote directory for a local job directory name
    pub fn job_dir(&self, name: &str) -> String {
        let base = self.workdir.trim_end_matches('/');
        if base.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", base, name)
        }
    }
}
