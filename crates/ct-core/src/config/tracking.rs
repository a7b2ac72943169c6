//! Tracking service and ledger configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Project tag used when neither the flag nor the config names one
pub const DEFAULT_PROJECT: &str = "chtc";

/// Connection details for the experiment-tracking service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Base URL of the tracking API
    pub base_url: String,

    /// Team or user that owns the runs
    pub entity: Option<String>,

    /// API key; tracking is disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default project tag
    pub project: Option<String>,

    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.wandb.ai".to_string(),
            entity: None,
            api_key: None,
            project: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TrackingConfig {
    /// Whether credentials are present
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Resolve the project tag: explicit value, then config, then the default
    pub fn project_or_default(&self, explicit: Option<&str>) -> String {
        explicit
            .or(self.project.as_deref())
            .unwrap_or(DEFAULT_PROJECT)
            .to_string()
    }
}

/// Where the correlation ledger lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger file, relative paths resolve against the working directory
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".chtc").join("ledger.jsonl"),
        }
    }
}
