//! ct-tracking: Experiment-tracking integration for cluster jobs
//!
//! Provides the [`Tracker`] abstraction with its HTTP implementation, plus
//! the two parsers that feed it: submit-file resources become the run's
//! configuration, and job-log resource usage becomes its metrics.

mod error;
mod http;
pub mod job_log;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod submit_file;
mod tracker;

pub use error::TrackingError;
pub use http::HttpTracker;
pub use job_log::parse_job_log;
pub use submit_file::parse_submit_resources;
pub use tracker::{Metrics, RunMetadata, Summary, Tracker, CLUSTER_TAG};

#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryTracker, TrackerCall};
