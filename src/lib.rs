//! Multi-provider image generation job engine
//!
//! Accepts a single prompt, fans it out to every enabled image model concurrently,
//! records each provider's outcome as it lands and lets clients poll one job id
//! for progressive results. Follow-up generations against a single model are
//! tracked per session.

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod moderation;
pub mod quota;
pub mod response;
pub mod sessions;
pub mod store;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::{AdapterSet, CredentialSource, ModelRegistry};
use dispatch::{DispatchCoordinator, DispatchDeps};
use jobs::JobManager;
use moderation::ContentFilter;
use quota::RateLimiter;
use response::ImageStore;
use sessions::SessionManager;
use store::{DocumentStore, RetryPolicy};

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub registry: Arc<ModelRegistry>,
    pub jobs: Arc<JobManager>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub content_filter: ContentFilter,
    pub coordinator: DispatchCoordinator,
    pub images: Arc<dyn ImageStore>,
}

/// External collaborators the engine is wired against
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub images: Arc<dyn ImageStore>,
    pub adapters: AdapterSet,
    pub credentials: Arc<dyn CredentialSource>,
}

impl AppState {
    pub fn build(settings: config::Settings, registry: ModelRegistry, deps: Collaborators) -> Self {
        let retry = RetryPolicy::from_config(&settings.storage);
        let cas_attempts = settings.storage.cas_max_attempts;

        let jobs = Arc::new(JobManager::new(deps.documents.clone(), retry, cas_attempts));
        let sessions = Arc::new(SessionManager::new(
            deps.documents.clone(),
            &settings.iteration,
            retry,
            cas_attempts,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            deps.documents,
            &settings.rate_limit,
            retry,
            cas_attempts,
        ));

        let coordinator = DispatchCoordinator::new(
            DispatchDeps {
                jobs: jobs.clone(),
                sessions: sessions.clone(),
                adapters: Arc::new(deps.adapters),
                credentials: deps.credentials,
                images: deps.images.clone(),
            },
            &settings.dispatch,
            &settings.iteration,
        );

        Self {
            content_filter: ContentFilter::new(&settings.moderation),
            settings: Arc::new(settings),
            registry: Arc::new(registry),
            jobs,
            sessions,
            rate_limiter,
            coordinator,
            images: deps.images,
        }
    }
}
