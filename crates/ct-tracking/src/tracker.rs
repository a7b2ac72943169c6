//! Tracking service abstraction

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use ct_core::{JobId, RunId};

use crate::error::TrackingError;

/// Metric name → value, logged against a run
pub type Metrics = BTreeMap<String, Value>;

/// Final key/value summary attached when a run is finished
pub type Summary = BTreeMap<String, Value>;

/// Tag every run created from a cluster job carries
pub const CLUSTER_TAG: &str = "chtc";

/// Descriptive fields of a new run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub name: String,
    pub tags: Vec<String>,
    pub config: BTreeMap<String, Value>,
}

impl RunMetadata {
    /// Metadata for the run that mirrors scheduler job `job_id`
    ///
    /// `config` is typically the resources parsed from the submit file; the
    /// job id and cluster name are added to it.
    pub fn for_job(job_id: &JobId, mut config: BTreeMap<String, Value>) -> Self {
        config.insert(
            "htcondor_job_id".to_string(),
            Value::String(job_id.to_string()),
        );
        config.insert("cluster".to_string(), Value::String(CLUSTER_TAG.to_string()));

        Self {
            name: format!("chtc-job-{}", job_id),
            tags: vec![CLUSTER_TAG.to_string()],
            config,
        }
    }

    /// Add extra tags, keeping the cluster tag and dropping duplicates
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }
}

/// An experiment-tracking backend
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Create a run under `project` and return its id
    async fn create_run(&self, project: &str, metadata: &RunMetadata) -> Result<RunId, TrackingError>;

    /// Log metrics against an existing run
    async fn update_run(&self, run_id: &RunId, metrics: &Metrics) -> Result<(), TrackingError>;

    /// Mark a run finished with a final summary
    async fn finalize_run(&self, run_id: &RunId, summary: &Summary) -> Result<(), TrackingError>;
}
