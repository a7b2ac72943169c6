//! Configuration management for chtc-tools
//!
//! The configuration is read once at process start: the TOML file is
//! loaded, environment/flag overrides are applied, and the resulting
//! [`ConfigFile`] is passed by reference to every component.

mod endpoint;
mod remote;
mod session;
pub mod serde_utils;
mod tracking;

pub use endpoint::EndpointConfig;
pub use remote::RemoteConfig;
pub use session::{SessionConfig, DEFAULT_TTL};
pub use tracking::{LedgerConfig, TrackingConfig, DEFAULT_PROJECT};

use crate::error::ConfigError;
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chtc-tools")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub endpoint: EndpointConfig,
    pub session: SessionConfig,
    pub remote: RemoteConfig,
    pub tracking: TrackingConfig,
    pub ledger: LedgerConfig,
}

/// Values supplied by environment variables or flags
///
/// Each `Some` replaces the corresponding file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub ttl: Option<Duration>,
    pub control_dir: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub tracking_url: Option<String>,
    pub api_key: Option<String>,
    pub entity: Option<String>,
    pub project: Option<String>,
}

impl ConfigFile {
    /// Load from `path`, or from the default location
    ///
    /// A missing file at the default location yields defaults; a missing
    /// file at an explicitly requested path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_config(path),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    load_config(&default_path)
                } else {
                    tracing::debug!("No config at {:?}, using defaults", default_path);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply overrides, consuming self
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(host) = &overrides.host {
            self.endpoint.host = Some(host.clone());
        }
        if let Some(user) = &overrides.user {
            self.endpoint.user = user.clone();
        }
        if let Some(port) = overrides.port {
            self.endpoint.port = port;
        }
        if let Some(ttl) = overrides.ttl {
            self.session.ttl = ttl;
        }
        if let Some(dir) = &overrides.control_dir {
            self.session.control_dir = dir.clone();
        }
        if let Some(path) = &overrides.ledger_path {
            self.ledger.path = path.clone();
        }
        if let Some(url) = &overrides.tracking_url {
            self.tracking.base_url = url.clone();
        }
        if let Some(key) = &overrides.api_key {
            self.tracking.api_key = Some(key.clone());
        }
        if let Some(entity) = &overrides.entity {
            self.tracking.entity = Some(entity.clone());
        }
        if let Some(project) = &overrides.project {
            self.tracking.project = Some(project.clone());
        }
        self
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        self.endpoint.resolve()
    }

    /// Copy safe to print: credentials are masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.tracking.api_key.is_some() {
            copy.tracking.api_key = Some("********".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.endpoint.port, 22);
        assert!(config.endpoint.host.is_none());
        assert_eq!(config.session.ttl, DEFAULT_TTL);
        assert_eq!(config.remote.submit_command, "condor_submit");
        assert!(!config.tracking.is_enabled());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let toml = r#"
            [endpoint]
            host = "ap2002.chtc.wisc.edu"
            user = "bucky"

            [session]
            ttl = 7200
        "#;
        let config: ConfigFile = toml::from_str(toml).unwrap();
        let endpoint = config.endpoint().unwrap();
        assert_eq!(endpoint, Endpoint::new("ap2002.chtc.wisc.edu", "bucky", 22));
        assert_eq!(config.session.ttl, Duration::from_secs(7200));
        assert_eq!(config.session.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_host_is_reported() {
        let config = ConfigFile::default();
        match config.endpoint() {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "endpoint.host"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            host: Some("submit.example.org".to_string()),
            port: Some(2222),
            ttl: Some(Duration::from_secs(60)),
            api_key: Some("secret".to_string()),
            project: Some("proj-x".to_string()),
            ..Default::default()
        };
        let config = ConfigFile::default().with_overrides(&overrides);

        assert_eq!(config.endpoint().unwrap().port, 2222);
        assert_eq!(config.session.ttl, Duration::from_secs(60));
        assert!(config.tracking.is_enabled());
        assert_eq!(config.tracking.project_or_default(None), "proj-x");
        assert_eq!(config.tracking.project_or_default(Some("other")), "other");
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let overrides = Overrides {
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let config = ConfigFile::default().with_overrides(&overrides).redacted();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = ConfigFile::default();
        config.endpoint.host = Some("ap2002.chtc.wisc.edu".to_string());
        save_config(&path, &config).unwrap();

        let loaded = ConfigFile::load(Some(&path)).unwrap();
        assert_eq!(loaded.endpoint.host.as_deref(), Some("ap2002.chtc.wisc.edu"));
    }

    #[test]
    fn test_explicit_missing_path_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            ConfigFile::load(Some(&path)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_remote_job_dir() {
        let remote = RemoteConfig::default();
        assert_eq!(remote.job_dir("mnist"), "chtc-jobs/mnist");

        let remote = RemoteConfig {
            workdir: "jobs/".to_string(),
            ..Default::default()
        };
        assert_eq!(remote.job_dir("mnist"), "jobs/mnist");
    }
}
