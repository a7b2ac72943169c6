//! Session descriptors and operation results

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use ct_core::time::remaining;
use ct_core::Endpoint;

use crate::marker::SessionMarker;
use crate::transport::ChannelHandle;

/// Descriptor of the shared channel to one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub endpoint: Endpoint,
    pub control_path: PathBuf,
    pub established_at_ms: u64,
    pub ttl: Duration,
    pub last_activity_ms: u64,
}

impl Session {
    /// Whether two descriptors refer to the same authenticated channel
    pub fn same_channel(&self, other: &Session) -> bool {
        self.endpoint == other.endpoint
            && self.control_path == other.control_path
            && self.established_at_ms == other.established_at_ms
    }

    /// Time left before the channel goes stale
    pub fn expires_in(&self) -> Duration {
        remaining(self.established_at_ms, self.ttl)
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            endpoint: self.endpoint.clone(),
            control_path: self.control_path.clone(),
        }
    }
}

impl From<SessionMarker> for Session {
    fn from(marker: SessionMarker) -> Self {
        Self {
            ttl: marker.ttl(),
            endpoint: marker.endpoint,
            control_path: marker.control_path,
            established_at_ms: marker.established_at_ms,
            last_activity_ms: marker.last_activity_ms,
        }
    }
}

/// Why a channel is no longer usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The validity window has run out
    TtlElapsed,
    /// The marker exists but the master did not answer
    ProbeFailed,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::TtlElapsed => write!(f, "ttl elapsed"),
            StaleReason::ProbeFailed => write!(f, "probe failed"),
        }
    }
}

/// Observable state of an endpoint's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Absent,
    Live { age: Duration },
    Stale { reason: StaleReason },
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Live { .. })
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Absent => write!(f, "absent"),
            SessionStatus::Live { .. } => write!(f, "live"),
            SessionStatus::Stale { reason } => write!(f, "stale ({})", reason),
        }
    }
}

/// How a caller obtained its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectOutcome {
    /// An existing live channel was joined; no authentication happened
    Reused,
    /// `Absent → Live`: the first authentication for this endpoint
    Established,
    /// `Stale → Live`: a fresh authentication replaced an expired or dead channel
    Reestablished,
}

impl ConnectOutcome {
    /// Whether an authentication handshake took place
    pub fn authenticated(&self) -> bool {
        !matches!(self, ConnectOutcome::Reused)
    }
}

/// Result of [`crate::SessionManager::connect`]
#[derive(Debug, Clone)]
pub struct Connection {
    pub session: Session,
    pub outcome: ConnectOutcome,
}

/// Result of a remote command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    /// How the channel used for this command was obtained
    pub connection: ConnectOutcome,
}

/// Result of a path transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub bytes_transferred: u64,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub connection: ConnectOutcome,
}
