//! Remote endpoint configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Endpoint;

/// Where the cluster access point lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Access point hostname (required before any remote operation)
    pub host: Option<String>,

    /// Login user, defaults to the local user name
    pub user: String,

    /// SSH port
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: whoami::username(),
            port: 22,
        }
    }
}

impl EndpointConfig {
    /// Build the endpoint, failing if no host has been configured
    pub fn resolve(&self) -> Result<Endpoint, ConfigError> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingField("endpoint.host".to_string()))?;

        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingField("endpoint.user".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("endpoint.port must be non-zero".to_string()));
        }

        Ok(Endpoint::new(host, self.user.trim(), self.port))
    }
}
