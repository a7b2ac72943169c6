//! Ledger rows

use serde::{Deserialize, Serialize};

use ct_core::time::current_time_millis;
use ct_core::{JobId, RunId};

/// One correlation row: a scheduler job and the tracking run it reports to
///
/// `run_id` is empty for jobs submitted without tracking, and for the
/// placeholder row written before a run is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_id: JobId,
    #[serde(default)]
    pub run_id: RunId,
    pub project: String,
    pub created_at_ms: u64,
    /// Remote job directory, for fetching outputs later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_dir: Option<String>,
}

impl LedgerEntry {
    /// A row stamped with the current time
    pub fn new(job_id: JobId, run_id: RunId, project: impl Into<String>) -> Self {
        Self {
            job_id,
            run_id,
            project: project.into(),
            created_at_ms: current_time_millis(),
            remote_dir: None,
        }
    }

    pub fn with_remote_dir(mut self, remote_dir: impl Into<String>) -> Self {
        self.remote_dir = Some(remote_dir.into());
        self
    }

    /// Whether this row names a tracking run
    pub fn has_run(&self) -> bool {
        !self.run_id.is_empty()
    }

    /// Latest-wins ordering: `self` supersedes `earlier` if it is at least as new
    ///
    /// Callers visit rows in file order, so equal timestamps resolve to the
    /// row appended later.
    pub(crate) fn supersedes(&self, earlier: &LedgerEntry) -> bool {
        self.created_at_ms >= earlier.created_at_ms
    }
}
