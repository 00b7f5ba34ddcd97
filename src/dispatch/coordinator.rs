//! Parallel fan-out of one job across its models

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::backend::{
    AdapterSet, CredentialSource, GenerateRequest, GeneratedImage, IterateRequest, ModelDescriptor, ProviderAdapter,
    ProviderError,
};
use crate::config::{DispatchConfig, IterationConfig};
use crate::jobs::{Job, JobError, JobManager, PromptSpec, SlotError, SlotUpdate};
use crate::response::{self, ImageError, ImageStore};
use crate::sessions::{Iteration, IterationTicket, SessionError, SessionManager};
use crate::store::{with_backoff, RetryPolicy};

/// Slot error code for calls torn down by shutdown
pub const DISPATCH_CANCELLED: &str = "DISPATCH_CANCELLED";
/// Slot error code for a persisted-image failure
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

/// Collaborators every provider call needs
pub struct DispatchDeps {
    pub jobs: Arc<JobManager>,
    pub sessions: Arc<SessionManager>,
    pub adapters: Arc<AdapterSet>,
    pub credentials: Arc<dyn CredentialSource>,
    pub images: Arc<dyn ImageStore>,
}

struct Shared {
    deps: DispatchDeps,
    semaphore: Semaphore,
    timeout: Duration,
    context_window: usize,
    /// Outer retry for slot writes that outlast the store's own retries
    outcome_retry: RetryPolicy,
}

/// Runs every model of a job concurrently and records each outcome as it lands
pub struct DispatchCoordinator {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    supervisors: TaskTracker,
}

impl DispatchCoordinator {
    pub fn new(deps: DispatchDeps, dispatch: &DispatchConfig, iteration: &IterationConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                deps,
                semaphore: Semaphore::new(dispatch.max_concurrent_calls),
                timeout: Duration::from_secs(dispatch.provider_timeout_secs),
                context_window: iteration.context_window,
                outcome_retry: RetryPolicy {
                    max_retries: dispatch.outcome_retry_attempts,
                    base_delay: Duration::from_millis(dispatch.outcome_retry_base_delay_ms),
                    max_delay: Duration::from_millis(dispatch.outcome_retry_max_delay_ms),
                },
            }),
            shutdown: CancellationToken::new(),
            supervisors: TaskTracker::new(),
        }
    }

    /// Start one task per model and return immediately.
    ///
    /// Slot `i` of `job` is driven by `models[i]`.
    pub fn dispatch(&self, job: &Job, models: &[ModelDescriptor]) {
        let shared = self.shared.clone();
        let token = self.shutdown.child_token();
        let job_id = job.id.clone();
        let prompt = job.prompt.clone();
        let models = models.to_vec();

        let span = tracing::info_span!("dispatch", job_id = %job_id);
        self.supervisors
            .spawn(supervise(shared, token, job_id, prompt, models).instrument(span));
    }

    /// Run one follow-up call for a session column and record the outcome
    pub async fn run_iteration(
        &self,
        session_id: &str,
        model: &ModelDescriptor,
        ticket: &IterationTicket,
        prompt: &str,
    ) -> Result<Iteration, SessionError> {
        let shared = &self.shared;
        let sessions = &shared.deps.sessions;

        let session = sessions.get(session_id).await?;
        let context = session.context_before(&model.name, ticket.index, shared.context_window);

        let source_ref = match session.column(&model.name).and_then(|c| c.latest_image_ref()) {
            Some(key) => Some(key.to_string()),
            None => shared
                .deps
                .jobs
                .get_status(session_id)
                .await
                .ok()
                .and_then(|job| job.slot_for_model(&model.name).and_then(|slot| slot.image_ref.clone())),
        };

        let source_image = match source_ref {
            Some(key) => match shared.deps.images.load(&key).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(session_id = %session_id, model = %model.name, error = %e, "Source image unavailable");
                    None
                }
            },
            None => None,
        };

        let outcome = match shared.prepare(model) {
            Ok((adapter, credential)) => {
                let request = IterateRequest {
                    generate: GenerateRequest {
                        target_id: model.target_id.clone(),
                        prompt: prompt.to_string(),
                        steps: None,
                        guidance: None,
                        control: None,
                        endpoint: model.endpoint.clone(),
                        credential,
                    },
                    source_image,
                    context,
                };
                let call = shared.invoke(adapter.iterate(request));
                let result = tokio::select! {
                    result = call => result.map_err(SlotError::from),
                    _ = self.shutdown.cancelled() => Err(cancelled()),
                };
                match result {
                    Ok(image) => {
                        let key_hint = response::iteration_image_key(session_id, &model.name, ticket.index);
                        shared.persist(&key_hint, &image).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(SlotError::from(e)),
        };

        let session = match outcome {
            Ok(image_ref) => {
                sessions
                    .complete_iteration(session_id, &model.name, ticket.index, &image_ref)
                    .await?
            }
            Err(slot_error) => {
                warn!(
                    session_id = %session_id,
                    model = %model.name,
                    iteration = ticket.index,
                    code = %slot_error.code,
                    "Iteration failed"
                );
                sessions
                    .fail_iteration(session_id, &model.name, ticket.index, slot_error)
                    .await?
            }
        };

        session
            .column(&model.name)
            .and_then(|c| c.iterations.iter().find(|i| i.index == ticket.index))
            .cloned()
            .ok_or_else(|| SessionError::UnknownIteration {
                model: model.name.clone(),
                index: ticket.index,
            })
    }

    /// Cancel in-flight calls and wait for every job to settle
    pub async fn shutdown(&self) {
        info!("Shutting down dispatch coordinator");
        self.shutdown.cancel();
        self.supervisors.close();
        self.supervisors.wait().await;
        info!("Dispatch coordinator stopped");
    }
}

/// Owns the task group for one job
async fn supervise(
    shared: Arc<Shared>,
    token: CancellationToken,
    job_id: String,
    prompt: PromptSpec,
    models: Vec<ModelDescriptor>,
) {
    let mut slots = JoinSet::new();
    for (index, model) in models.into_iter().enumerate() {
        let shared = shared.clone();
        let job_id = job_id.clone();
        let prompt = prompt.clone();
        slots.spawn(async move { shared.run_slot(&job_id, index, &model, &prompt).await });
    }

    let total = slots.len();
    let mut reconcile = None;
    let mut unsettled = 0usize;

    loop {
        tokio::select! {
            joined = slots.join_next() => match joined {
                None => break,
                Some(Ok(true)) => {}
                Some(Ok(false)) => unsettled += 1,
                Some(Err(e)) => {
                    error!(job_id = %job_id, error = %e, "Slot task failed outside the adapter call");
                    reconcile = Some(SlotError::new("PROVIDER_PANICKED", "slot task ended without a result"));
                }
            },
            _ = token.cancelled() => {
                slots.abort_all();
                while slots.join_next().await.is_some() {}
                reconcile = Some(cancelled());
                break;
            }
        }
    }

    if reconcile.is_none() && unsettled > 0 {
        warn!(job_id = %job_id, unsettled = unsettled, "Slot outcomes were not recorded, closing them");
        reconcile = Some(SlotError::new(STORAGE_ERROR, "slot outcome could not be recorded"));
    }

    if let Some(error) = reconcile {
        shared.fail_unfinished(&job_id, error).await;
    }

    info!(job_id = %job_id, models = total, "Dispatch finished");
}

/// The slot ended in a terminal state, written now or by someone else earlier
fn settled(result: &Result<(), JobError>) -> bool {
    matches!(result, Ok(()) | Err(JobError::IllegalTransition { .. }))
}

fn is_store_outage(e: &JobError) -> bool {
    matches!(e, JobError::Store(inner) if inner.is_retryable())
}

fn cancelled() -> SlotError {
    SlotError::new(DISPATCH_CANCELLED, "dispatch was cancelled before the provider answered")
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl From<ProviderError> for SlotError {
    fn from(e: ProviderError) -> Self {
        SlotError::new(e.code(), e.sanitized_message())
    }
}

impl Shared {
    /// Adapter and credential for a model, or the error the slot fails with
    fn prepare(
        &self,
        model: &ModelDescriptor,
    ) -> Result<(Arc<dyn ProviderAdapter>, Option<secrecy::SecretString>), ProviderError> {
        let adapter = self
            .deps
            .adapters
            .adapter_for(model.provider)
            .ok_or_else(|| ProviderError::Unsupported(model.provider.to_string()))?;

        let credential = match &model.credential_ref {
            Some(reference) => Some(
                self.deps
                    .credentials
                    .resolve(reference)
                    .ok_or_else(|| ProviderError::MissingCredential(reference.clone()))?,
            ),
            None => None,
        };

        Ok((adapter, credential))
    }

    /// Permit, timeout and panic isolation around one adapter call
    async fn invoke<F>(&self, call: F) -> Result<GeneratedImage, ProviderError>
    where
        F: Future<Output = Result<GeneratedImage, ProviderError>> + Send,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ProviderError::Connection("dispatch permits closed".to_string()))?;

        match tokio::time::timeout(self.timeout, AssertUnwindSafe(call).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ProviderError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }

    /// Decode and store a generated image, returning its key
    async fn persist(&self, key_hint: &str, image: &GeneratedImage) -> Result<String, SlotError> {
        let bytes = response::base64::decode(&image.b64_json)
            .map_err(|e| SlotError::new("MALFORMED_RESPONSE", e.to_string()))?;

        self.deps.images.save(key_hint, &bytes).await.map_err(|e| {
            error!(key = %key_hint, error = %e, "Failed to persist image");
            match e {
                ImageError::InvalidData(_) => SlotError::new("MALFORMED_RESPONSE", e.to_string()),
                _ => SlotError::new(STORAGE_ERROR, "generated image could not be stored"),
            }
        })
    }

    /// Drive one slot from pending to a terminal state.
    ///
    /// Returns false when the terminal state could not be written.
    async fn run_slot(&self, job_id: &str, index: usize, model: &ModelDescriptor, prompt: &PromptSpec) -> bool {
        let (adapter, credential) = match self.prepare(model) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(job_id = %job_id, index = index, model = %model.name, error = %e, "Slot failed before dispatch");
                return settled(&self.record(job_id, index, SlotUpdate::Failed { error: e.into() }).await);
            }
        };

        match self.record(job_id, index, SlotUpdate::Started).await {
            Ok(()) => {}
            // Already settled
            Err(JobError::IllegalTransition { .. }) => return true,
            Err(_) => {
                let error = SlotError::new(STORAGE_ERROR, "slot progress could not be recorded");
                return settled(&self.record(job_id, index, SlotUpdate::Failed { error }).await);
            }
        }
        debug!(job_id = %job_id, index = index, model = %model.name, adapter = %adapter.name(), "Calling provider");

        let request = GenerateRequest {
            target_id: model.target_id.clone(),
            prompt: prompt.text.clone(),
            steps: prompt.steps,
            guidance: prompt.guidance,
            control: prompt.control,
            endpoint: model.endpoint.clone(),
            credential,
        };

        let update = match self.invoke(adapter.generate(request)).await {
            Ok(image) => {
                let key_hint = response::slot_image_key(job_id, &model.name, index);
                match self.persist(&key_hint, &image).await {
                    Ok(image_ref) => SlotUpdate::Succeeded { image_ref },
                    Err(error) => SlotUpdate::Failed { error },
                }
            }
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    index = index,
                    model = %model.name,
                    code = e.code(),
                    "Provider call failed"
                );
                SlotUpdate::Failed { error: e.into() }
            }
        };

        settled(&self.record(job_id, index, update).await)
    }

    /// Persist a slot update, riding out storage outages on the outer retry policy
    async fn record(&self, job_id: &str, index: usize, update: SlotUpdate) -> Result<(), JobError> {
        let result = with_backoff(self.outcome_retry, "dispatch.record", is_store_outage, || {
            self.deps.jobs.record_progress(job_id, index, update.clone())
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            // Logged by the job manager
            Err(e @ JobError::IllegalTransition { .. }) => Err(e),
            Err(e) => {
                error!(job_id = %job_id, index = index, error = %e, "Failed to record slot progress");
                Err(e)
            }
        }
    }

    /// Fail every slot that never reached a terminal state
    async fn fail_unfinished(&self, job_id: &str, error: SlotError) {
        let reload = with_backoff(self.outcome_retry, "dispatch.reload", is_store_outage, || {
            self.deps.jobs.get_status(job_id)
        })
        .await;
        let job = match reload {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Could not load job to close unfinished slots");
                return;
            }
        };

        for slot in job.results.iter().filter(|s| !s.status.is_terminal()) {
            let _ = self
                .record(job_id, slot.index, SlotUpdate::Failed { error: error.clone() })
                .await;
        }
    }
}
