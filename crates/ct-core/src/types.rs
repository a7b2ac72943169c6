//! Core domain types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hashed endpoint name used for control files.
///
/// Unix socket paths are limited to ~104 bytes, so the control socket
/// is named after a digest of the endpoint rather than the endpoint itself.
const CONTROL_NAME_LEN: usize = 16;

/// A remote target: the (host, user, port) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Remote hostname
    pub host: String,
    /// Login user on the remote host
    pub user: String,
    /// SSH port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port,
        }
    }

    /// Stable key identifying this endpoint (`user@host:port`)
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// `user@host` destination as understood by ssh and rsync
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Short filesystem-safe name derived from the endpoint key
    pub fn control_name(&self) -> String {
        let digest = Sha256::digest(self.key().as_bytes());
        let mut name = hex::encode(digest);
        name.truncate(CONTROL_NAME_LEN);
        name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Job identifier assigned by the remote scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Run identifier assigned by the tracking service
///
/// Empty when tracking was requested but no run has been created (yet).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Create a new run ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The placeholder written before a run exists
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Whether this is the empty placeholder
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
