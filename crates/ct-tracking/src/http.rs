//! HTTP tracking client
//!
//! Speaks a small JSON API authenticated with a bearer API key:
//!
//! | Call            | Request                                  |
//! |-----------------|------------------------------------------|
//! | create run      | `POST  {base}/api/v1/runs`               |
//! | log metrics     | `PATCH {base}/api/v1/runs/{id}`          |
//! | finish run      | `POST  {base}/api/v1/runs/{id}/finish`   |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ct_core::config::TrackingConfig;
use ct_core::RunId;

use crate::error::TrackingError;
use crate::tracker::{Metrics, RunMetadata, Summary, Tracker};

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity: Option<&'a str>,
    #[serde(flatten)]
    metadata: &'a RunMetadata,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    #[serde(default)]
    id: String,
}

#[derive(Serialize)]
struct UpdateRunRequest<'a> {
    metrics: &'a Metrics,
}

#[derive(Serialize)]
struct FinishRunRequest<'a> {
    summary: &'a Summary,
}

/// [`Tracker`] backed by the tracking service's HTTP API
#[derive(Debug, Clone)]
pub struct HttpTracker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    entity: Option<String>,
}

impl HttpTracker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        entity: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TrackingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            entity,
        })
    }

    /// Build a client from configuration, or `None` if no API key is set
    pub fn from_config(config: &TrackingConfig) -> Result<Option<Self>, TrackingError> {
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return Ok(None),
        };
        Self::new(
            config.base_url.clone(),
            api_key,
            config.entity.clone(),
            config.request_timeout,
        )
        .map(Some)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TrackingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TrackingError::Api {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn create_run(&self, project: &str, metadata: &RunMetadata) -> Result<RunId, TrackingError> {
        let request = CreateRunRequest {
            project,
            entity: self.entity.as_deref(),
            metadata,
        };
        let response = self
            .client
            .post(self.url("runs"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let created: CreateRunResponse = Self::check(response).await?.json().await?;

        if created.id.is_empty() {
            return Err(TrackingError::MissingRunId);
        }
        tracing::debug!(run_id = %created.id, project, "Created tracking run {}", metadata.name);
        Ok(RunId::new(created.id))
    }

    async fn update_run(&self, run_id: &RunId, metrics: &Metrics) -> Result<(), TrackingError> {
        let response = self
            .client
            .patch(self.url(&format!("runs/{}", run_id.as_str())))
            .bearer_auth(&self.api_key)
            .json(&UpdateRunRequest { metrics })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn finalize_run(&self, run_id: &RunId, summary: &Summary) -> Result<(), TrackingError> {
        let response = self
            .client
            .post(self.url(&format!("runs/{}/finish", run_id.as_str())))
            .bearer_auth(&self.api_key)
            .json(&FinishRunRequest { summary })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
