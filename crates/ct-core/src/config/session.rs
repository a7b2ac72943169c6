//! Session manager configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Default validity window of an authenticated channel
pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Configuration for the shared remote channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an authenticated channel stays valid
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Upper bound on the interactive authentication (MFA prompts included)
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Upper bound on a liveness probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Default timeout for remote commands
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Default timeout for uploads and downloads
    #[serde(with = "duration_secs")]
    pub transfer_timeout: Duration,

    /// Directory holding control sockets, markers and lock files
    pub control_dir: PathBuf,

    /// ssh client binary
    pub ssh_program: String,

    /// rsync binary
    pub rsync_program: String,

    /// Extra `-o` options passed to every ssh invocation
    pub ssh_options: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            connect_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
            transfer_timeout: Duration::from_secs(3600),
            control_dir: super::default_config_dir().join("control"),
            ssh_program: "ssh".to_string(),
            rsync_program: "rsync".to_string(),
            ssh_options: vec![],
        }
    }
}
