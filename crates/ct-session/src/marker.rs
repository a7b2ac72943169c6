//! On-disk session markers
//!
//! Each endpoint owns three files in the control directory, all named after
//! [`Endpoint::control_name`]: the control socket (`.sock`), the marker
//! (`.json`) recording when the channel was established and its ttl, and
//! the lock file (`.lock`) guarding the `Absent → Live` transition.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ct_core::lockfile::{remove_if_exists, write_atomic};
use ct_core::time::current_time_millis;
use ct_core::Endpoint;

/// Paths of the per-endpoint control files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPaths {
    pub socket: PathBuf,
    pub marker: PathBuf,
    pub lock: PathBuf,
}

/// Persisted record of an established channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub endpoint: Endpoint,
    pub control_path: PathBuf,
    pub established_at_ms: u64,
    pub ttl_ms: u64,
    pub last_activity_ms: u64,
}

impl SessionMarker {
    /// A marker for a channel established now
    pub fn new(endpoint: Endpoint, control_path: PathBuf, ttl: Duration) -> Self {
        let now = current_time_millis();
        Self {
            endpoint,
            control_path,
            established_at_ms: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            last_activity_ms: now,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Reads and writes markers under one control directory
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self, endpoint: &Endpoint) -> ControlPaths {
        let name = endpoint.control_name();
        ControlPaths {
            socket: self.dir.join(format!("{}.sock", name)),
            marker: self.dir.join(format!("{}.json", name)),
            lock: self.dir.join(format!("{}.lock", name)),
        }
    }

    /// Read the marker for `endpoint`
    ///
    /// A marker that fails to parse is treated as absent and logged, so a
    /// corrupted file never wedges the endpoint.
    pub fn read(&self, endpoint: &Endpoint) -> io::Result<Option<SessionMarker>> {
        let path = self.paths(endpoint).marker;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<SessionMarker>(&bytes) {
            Ok(marker) if marker.endpoint == *endpoint => Ok(Some(marker)),
            Ok(marker) => {
                tracing::warn!(
                    "Marker {:?} belongs to {}, not {}; ignoring",
                    path,
                    marker.endpoint,
                    endpoint
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable session marker {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn write(&self, marker: &SessionMarker) -> io::Result<()> {
        let path = self.paths(&marker.endpoint).marker;
        let bytes = serde_json::to_vec_pretty(marker)?;
        write_atomic(&path, &bytes)
    }

    pub fn remove(&self, endpoint: &Endpoint) -> io::Result<()> {
        remove_if_exists(&self.paths(endpoint).marker)
    }
}
