//! In-memory tracker for tests

use async_trait::async_trait;
use std::sync::Mutex;

use ct_core::RunId;

use crate::error::TrackingError;
use crate::tracker::{Metrics, RunMetadata, Summary, Tracker};

/// A call received by [`MemoryTracker`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCall {
    Create { project: String, metadata: RunMetadata },
    Update { run_id: RunId, metrics: Metrics },
    Finalize { run_id: RunId, summary: Summary },
}

#[derive(Default)]
struct State {
    calls: Vec<TrackerCall>,
    fail_with: Option<u16>,
    next_run: usize,
}

/// Records every call; run ids are `run-1`, `run-2`, ...
#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call fail with HTTP `status` (`None` to recover)
    pub fn fail_with(&self, status: Option<u16>) {
        self.lock().fail_with = status;
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory tracker state poisoned")
    }

    fn record(&self, call: TrackerCall) -> Result<(), TrackingError> {
        let mut state = self.lock();
        if let Some(status) = state.fail_with {
            return Err(TrackingError::Api {
                status,
                body: "simulated failure".to_string(),
            });
        }
        state.calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn create_run(&self, project: &str, metadata: &RunMetadata) -> Result<RunId, TrackingError> {
        self.record(TrackerCall::Create {
            project: project.to_string(),
            metadata: metadata.clone(),
        })?;
        let mut state = self.lock();
        state.next_run += 1;
        Ok(RunId::new(format!("run-{}", state.next_run)))
    }

    async fn update_run(&self, run_id: &RunId, metrics: &Metrics) -> Result<(), TrackingError> {
        self.record(TrackerCall::Update {
            run_id: run_id.clone(),
            metrics: metrics.clone(),
        })
    }

    async fn finalize_run(&self, run_id: &RunId, summary: &Summary) -> Result<(), TrackingError> {
        self.record(TrackerCall::Finalize {
            run_id: run_id.clone(),
            summary: summary.clone(),
        })
    }
}
