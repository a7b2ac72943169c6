//! Tracking errors

use thiserror::Error;

/// Failures talking to the tracking service
#[derive(Error, Debug)]
pub enum TrackingError {
    /// The request never produced a response (DNS, TLS, timeout...)
    #[error("Tracking request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("Tracking service returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A create call succeeded but named no run
    #[error("Tracking service did not return a run id")]
    MissingRunId,
}

impl TrackingError {
    /// Whether the service rejected the credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TrackingError::Api { status: 401 | 403, .. })
    }
}
