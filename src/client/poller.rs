//! Status polling client for `GET /status/{jobId}`

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::jobs::{JobStatus, SlotError, SlotStatus};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("gave up after {attempts} consecutive failed polls: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("job {job_id} still {status} after {elapsed:?}")]
    CeilingReached {
        job_id: String,
        status: JobStatus,
        elapsed: Duration,
    },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total_models: usize,
    pub completed_models: usize,
    #[serde(default)]
    pub results: Vec<SlotSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSnapshot {
    pub model: String,
    pub status: SlotStatus,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error: Option<SlotError>,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Consecutive transient failures tolerated before giving up
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Overall deadline for one job
    pub ceiling: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            ceiling: Duration::from_secs(300),
        }
    }
}

pub struct JobPoller {
    client: Client,
    base_url: String,
    config: PollerConfig,
}

enum Attempt {
    Snapshot(JobSnapshot),
    Transient(String),
}

impl JobPoller {
    pub fn new(base_url: impl Into<String>, config: PollerConfig) -> Result<Self, PollError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Poll until the job is terminal, handing every snapshot to `on_snapshot`
    pub async fn poll_until_done<F>(&self, job_id: &str, mut on_snapshot: F) -> Result<JobSnapshot, PollError>
    where
        F: FnMut(&JobSnapshot),
    {
        let started = Instant::now();
        let mut failures = 0u32;
        let mut last_status = JobStatus::Pending;

        loop {
            let wait = match self.fetch(job_id).await? {
                Attempt::Snapshot(snapshot) => {
                    failures = 0;
                    on_snapshot(&snapshot);
                    if snapshot.status.is_terminal() {
                        return Ok(snapshot);
                    }
                    last_status = snapshot.status;
                    debug!(
                        job_id = %job_id,
                        completed = snapshot.completed_models,
                        total = snapshot.total_models,
                        "Job still running"
                    );
                    self.config.interval
                }
                Attempt::Transient(reason) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        return Err(PollError::RetriesExhausted {
                            attempts: failures,
                            last: reason,
                        });
                    }
                    let backoff = self.backoff(failures);
                    warn!(job_id = %job_id, attempt = failures, error = %reason, ?backoff, "Status poll failed");
                    backoff
                }
            };

            let elapsed = started.elapsed();
            if elapsed + wait > self.config.ceiling {
                return Err(PollError::CeilingReached {
                    job_id: job_id.to_string(),
                    status: last_status,
                    elapsed,
                });
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        self.config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(failures.saturating_sub(1)))
            .min(self.config.max_backoff)
    }

    async fn fetch(&self, job_id: &str) -> Result<Attempt, PollError> {
        let url = format!("{}/status/{}", self.base_url, job_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(Attempt::Transient(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PollError::NotFound(job_id.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(PollError::Unexpected(format!("HTTP {}", status)));
        }

        match response.json::<JobSnapshot>().await {
            Ok(snapshot) => Ok(Attempt::Snapshot(snapshot)),
            Err(e) => Err(PollError::Unexpected(e.to_string())),
        }
    }
}
