//! Session lifecycle and the per-model iteration cap

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::session::{Iteration, IterationStatus, ModelColumn, Session};
use crate::config::IterationConfig;
use crate::jobs::{Job, SlotError};
use crate::store::{self, with_backoff, CasOutcome, DocumentStore, Mutation, RetryPolicy, StoreError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("model '{model}' is not part of session {session_id}")]
    UnknownModel { session_id: String, model: String },

    #[error("iteration limit of {max} reached for model '{model}'")]
    LimitReached { model: String, max: u32 },

    #[error("iteration {index} of '{model}' cannot move from {from} to {to}")]
    IllegalTransition {
        model: String,
        index: u32,
        from: IterationStatus,
        to: IterationStatus,
    },

    #[error("iteration {index} of '{model}' does not exist")]
    UnknownIteration { model: String, index: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A newly appended iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationTicket {
    pub index: u32,
    /// Count after appending, initial generation included
    pub iteration_count: u32,
    /// Count has reached the warning threshold
    pub warning: bool,
}

pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    cas_max_attempts: u32,
    max_per_model: u32,
    warning_threshold: u32,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: &IterationConfig,
        retry: RetryPolicy,
        cas_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            retry,
            cas_max_attempts,
            max_per_model: config.max_per_model,
            warning_threshold: config.warning_threshold,
        }
    }

    fn key(session_id: &str) -> String {
        format!("sessions/{}", session_id)
    }

    pub fn max_per_model(&self) -> u32 {
        self.max_per_model
    }

    /// Open the session for a freshly created job, one column per slot
    pub async fn open(&self, job: &Job) -> Result<Session, SessionError> {
        let columns: BTreeMap<String, ModelColumn> = job
            .results
            .iter()
            .map(|slot| {
                (
                    slot.model.clone(),
                    ModelColumn {
                        job_index: slot.index,
                        iterations: Vec::new(),
                    },
                )
            })
            .collect();

        let session = Session {
            id: job.id.clone(),
            prompt: job.prompt.text.clone(),
            created_at: job.created_at,
            columns,
        };

        let key = Self::key(&session.id);
        let body = store::encode(&session)?;
        let outcome = with_backoff(self.retry, "sessions.open", StoreError::is_retryable, || {
            self.store.compare_and_swap(&key, None, body.clone())
        })
        .await?;
        if let CasOutcome::Conflict { .. } = outcome {
            return Err(SessionError::Store(StoreError::Contention(key)));
        }

        debug!(session_id = %session.id, models = session.columns.len(), "Session opened");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        let key = Self::key(session_id);
        let doc = with_backoff(self.retry, "sessions.get", StoreError::is_retryable, || self.store.get(&key))
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(store::decode(&key, &doc)?)
    }

    /// Read-only cap check; [`SessionManager::add_iteration`] re-checks atomically
    pub async fn ensure_capacity(&self, session_id: &str, model: &str) -> Result<(), SessionError> {
        let count = self.iteration_count(session_id, model).await?;
        if count >= self.max_per_model {
            return Err(SessionError::LimitReached {
                model: model.to_string(),
                max: self.max_per_model,
            });
        }
        Ok(())
    }

    /// Append an in-progress iteration unless the column is at its cap
    pub async fn add_iteration(&self, session_id: &str, model: &str, prompt: &str) -> Result<IterationTicket, SessionError> {
        let key = Self::key(session_id);
        let max = self.max_per_model;
        let threshold = self.warning_threshold;

        let result = store::update(
            self.store.as_ref(),
            self.retry,
            &key,
            self.cas_max_attempts,
            |current: Option<Session>| -> Result<Mutation<Session, IterationTicket>, SessionError> {
                let mut session = current.ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
                let column = session.columns.get_mut(model).ok_or_else(|| SessionError::UnknownModel {
                    session_id: session_id.to_string(),
                    model: model.to_string(),
                })?;

                if column.iteration_count() >= max {
                    return Err(SessionError::LimitReached {
                        model: model.to_string(),
                        max,
                    });
                }

                let index = column.next_index();
                column.iterations.push(Iteration {
                    index,
                    prompt: prompt.to_string(),
                    status: IterationStatus::InProgress,
                    image_ref: None,
                    error: None,
                    started_at: Utc::now(),
                    completed_at: None,
                });

                let iteration_count = column.iteration_count();
                let ticket = IterationTicket {
                    index,
                    iteration_count,
                    warning: iteration_count >= threshold,
                };
                Ok(Mutation::Write(session, ticket))
            },
        )
        .await;

        match &result {
            Ok(ticket) => info!(
                session_id = %session_id,
                model = %model,
                iteration = ticket.index,
                count = ticket.iteration_count,
                "Iteration added"
            ),
            Err(SessionError::LimitReached { max, .. }) => warn!(
                session_id = %session_id,
                model = %model,
                max = *max,
                "Iteration limit reached"
            ),
            Err(_) => {}
        }
        result
    }

    pub async fn complete_iteration(
        &self,
        session_id: &str,
        model: &str,
        index: u32,
        image_ref: &str,
    ) -> Result<Session, SessionError> {
        self.finish(session_id, model, index, IterationStatus::Completed, |iteration| {
            iteration.image_ref = Some(image_ref.to_string());
        })
        .await
    }

    pub async fn fail_iteration(
        &self,
        session_id: &str,
        model: &str,
        index: u32,
        error: SlotError,
    ) -> Result<Session, SessionError> {
        self.finish(session_id, model, index, IterationStatus::Error, |iteration| {
            iteration.error = Some(error.clone());
        })
        .await
    }

    /// Move an in-progress iteration to a terminal state
    async fn finish<F>(
        &self,
        session_id: &str,
        model: &str,
        index: u32,
        to: IterationStatus,
        apply: F,
    ) -> Result<Session, SessionError>
    where
        F: Fn(&mut Iteration),
    {
        let key = Self::key(session_id);
        let result = store::update(
            self.store.as_ref(),
            self.retry,
            &key,
            self.cas_max_attempts,
            |current: Option<Session>| -> Result<Mutation<Session, Session>, SessionError> {
                let mut session = current.ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
                let column = session.columns.get_mut(model).ok_or_else(|| SessionError::UnknownModel {
                    session_id: session_id.to_string(),
                    model: model.to_string(),
                })?;
                let iteration = column.iteration_mut(index).ok_or_else(|| SessionError::UnknownIteration {
                    model: model.to_string(),
                    index,
                })?;

                if iteration.status != IterationStatus::InProgress {
                    return Err(SessionError::IllegalTransition {
                        model: model.to_string(),
                        index,
                        from: iteration.status,
                        to,
                    });
                }

                apply(iteration);
                iteration.status = to;
                iteration.completed_at = Some(Utc::now());
                Ok(Mutation::Write(session.clone(), session))
            },
        )
        .await;

        if let Err(SessionError::IllegalTransition { from, .. }) = &result {
            warn!(
                session_id = %session_id,
                model = %model,
                iteration = index,
                from = %from,
                to = %to,
                "Rejected illegal iteration transition"
            );
        }
        result
    }

    pub async fn iteration_count(&self, session_id: &str, model: &str) -> Result<u32, SessionError> {
        let session = self.get(session_id).await?;
        session
            .column(model)
            .map(ModelColumn::iteration_count)
            .ok_or_else(|| SessionError::UnknownModel {
                session_id: session_id.to_string(),
                model: model.to_string(),
            })
    }

    /// Image of the latest completed follow-up, if any
    pub async fn latest_image_ref(&self, session_id: &str, model: &str) -> Result<Option<String>, SessionError> {
        let session = self.get(session_id).await?;
        Ok(session
            .column(model)
            .and_then(|c| c.latest_image_ref())
            .map(str::to_string))
    }

    pub async fn context_for(&self, session_id: &str, model: &str, window: usize) -> Result<Vec<String>, SessionError> {
        Ok(self.get(session_id).await?.context_for(model, window))
    }
}
