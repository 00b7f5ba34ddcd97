//! Job lifecycle against the shared document store

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::job::{Job, PromptSpec, SlotStatus, SlotUpdate};
use crate::backend::registry::ModelDescriptor;
use crate::store::{self, with_backoff, CasOutcome, DocumentStore, Mutation, RetryPolicy, StoreError};

/// Job manager errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("slot {index} of job {job_id} is out of range (total {total})")]
    SlotOutOfRange { job_id: String, index: usize, total: usize },

    #[error("illegal transition {from} -> {to} on slot {index} of job {job_id}")]
    IllegalTransition {
        job_id: String,
        index: usize,
        from: SlotStatus,
        to: SlotStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates jobs, records per-slot progress and serves snapshots
pub struct JobManager {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    cas_max_attempts: u32,
}

impl JobManager {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy, cas_max_attempts: u32) -> Self {
        Self {
            store,
            retry,
            cas_max_attempts,
        }
    }

    fn key(job_id: &str) -> String {
        format!("jobs/{}", job_id)
    }

    /// Create and persist a job with every slot pending
    pub async fn create(&self, prompt: PromptSpec, models: &[ModelDescriptor]) -> Result<Job, JobError> {
        let job = Job::new(prompt, models);
        self.insert(&job).await?;
        Ok(job)
    }

    /// Persist a job built elsewhere; fails if the id is already taken
    pub async fn insert(&self, job: &Job) -> Result<(), JobError> {
        let key = Self::key(&job.id);
        let body = store::encode(&job)?;

        let outcome = with_backoff(self.retry, "jobs.create", StoreError::is_retryable, || {
            self.store.compare_and_swap(&key, None, body.clone())
        })
        .await?;

        if let CasOutcome::Conflict { .. } = outcome {
            return Err(JobError::Store(StoreError::Contention(key)));
        }

        info!(
            job_id = %job.id,
            total_models = job.total_models,
            "Job created"
        );
        Ok(())
    }

    /// Move one slot along a legal edge and persist it.
    ///
    /// The transition is checked against the stored document on every
    /// attempt, so a late callback against a terminal slot is rejected
    /// rather than applied.
    pub async fn record_progress(&self, job_id: &str, index: usize, update: SlotUpdate) -> Result<Job, JobError> {
        let key = Self::key(job_id);

        let result = store::update(
            self.store.as_ref(),
            self.retry,
            &key,
            self.cas_max_attempts,
            |current: Option<Job>| -> Result<Mutation<Job, Job>, JobError> {
                let mut job = current.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
                let total = job.results.len();
                let slot = job.results.get_mut(index).ok_or_else(|| JobError::SlotOutOfRange {
                    job_id: job_id.to_string(),
                    index,
                    total,
                })?;

                slot.apply(update.clone(), Utc::now())
                    .map_err(|(from, to)| JobError::IllegalTransition {
                        job_id: job_id.to_string(),
                        index,
                        from,
                        to,
                    })?;

                Ok(Mutation::Write(job.clone(), job))
            },
        )
        .await;

        match &result {
            Ok(job) => {
                debug!(
                    job_id = %job_id,
                    index = index,
                    state = %update.target(),
                    status = %job.status(),
                    completed = job.completed_models(),
                    "Slot progress recorded"
                );
            }
            Err(JobError::IllegalTransition { from, to, .. }) => {
                warn!(
                    job_id = %job_id,
                    index = index,
                    from = %from,
                    to = %to,
                    "Rejected illegal slot transition"
                );
            }
            Err(_) => {}
        }

        result
    }

    /// Latest persisted snapshot
    pub async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        let key = Self::key(job_id);
        let doc = with_backoff(self.retry, "jobs.get", StoreError::is_retryable, || self.store.get(&key))
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        Ok(store::decode(&key, &doc)?)
    }
}
