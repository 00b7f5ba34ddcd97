//! HTTP request handlers

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::jobs::{Job, JobStatus, PromptSpec, SlotError, SlotStatus};
use crate::middleware::CorrelationId;
use crate::quota::Decision;
use crate::response::{self, ImageError};
use crate::sessions::IterationStatus;
use crate::AppState;

const UNKNOWN_CALLER: &str = "unknown";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub prompt: Option<String>,
    pub steps: Option<u32>,
    pub guidance: Option<f32>,
    pub control: Option<f32>,
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub job_id: String,
    pub session_id: String,
    pub total_models: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub index: usize,
    pub model: String,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SlotError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total_models: usize,
    pub completed_models: usize,
    pub created_at: DateTime<Utc>,
    pub prompt: String,
    pub results: Vec<SlotView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterateBody {
    pub session_id: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterateResponse {
    pub session_id: String,
    pub model: String,
    pub iteration: u32,
    pub iteration_count: u32,
    pub warning: bool,
    pub status: IterationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SlotError>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models: usize,
}

/// Start a fan-out job across every enabled model
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    payload: std::result::Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    let Json(body) = payload.map_err(|e| AppError::InvalidJson(e.body_text()))?;

    let text = validate_prompt(body.prompt.as_deref(), state.settings.prompt.max_length)?;
    validate_range("steps", body.steps.map(|s| s as f32), 1.0, 100.0)?;
    validate_range("guidance", body.guidance, 1.0, 20.0)?;
    validate_range("control", body.control, 0.0, 2.0)?;

    if state.content_filter.is_blocked(&text) {
        warn!(correlation_id = %correlation.as_str(), "Prompt rejected by content filter");
        return Err(AppError::InappropriateContent);
    }

    let caller = caller_identity(body.caller_id.as_deref(), &headers);
    charge(&state, &caller).await?;

    let models = state.registry.list_enabled();
    if models.is_empty() {
        return Err(AppError::NoModelsEnabled);
    }

    let prompt = PromptSpec {
        text,
        steps: body.steps,
        guidance: body.guidance,
        control: body.control,
    };
    // Session first: a job is only ever visible together with its session
    let job = Job::new(prompt, models);
    state.sessions.open(&job).await?;
    state.jobs.insert(&job).await?;
    state.coordinator.dispatch(&job, models);

    info!(
        correlation_id = %correlation.as_str(),
        job_id = %job.id,
        caller = %caller,
        models = job.total_models,
        "Generation started"
    );

    Ok(Json(GenerateResponse {
        session_id: job.id.clone(),
        total_models: job.total_models,
        message: format!("Generating images with {} models", job.total_models),
        job_id: job.id,
    }))
}

/// Latest persisted view of a job
pub async fn status(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Result<Json<StatusResponse>> {
    let job = state.jobs.get_status(&job_id).await?;
    Ok(Json(status_view(&job, state.images.as_ref())))
}

/// Run one follow-up generation against a single model of a session
pub async fn iterate(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    payload: std::result::Result<Json<IterateBody>, JsonRejection>,
) -> Result<Json<IterateResponse>> {
    let Json(body) = payload.map_err(|e| AppError::InvalidJson(e.body_text()))?;

    let session_id = required("sessionId", body.session_id)?;
    let model_name = required("model", body.model)?;
    let text = validate_prompt(body.prompt.as_deref(), state.settings.prompt.max_length)?;

    if state.content_filter.is_blocked(&text) {
        warn!(correlation_id = %correlation.as_str(), session_id = %session_id, "Iteration prompt rejected by content filter");
        return Err(AppError::InappropriateContent);
    }

    let model = state
        .registry
        .get(&model_name)
        .ok_or_else(|| AppError::ModelNotInSession {
            session_id: session_id.clone(),
            model: model_name.clone(),
        })?;

    // Requests that cannot run never reach the quota
    state.sessions.ensure_capacity(&session_id, &model.name).await?;

    let caller = caller_identity(body.caller_id.as_deref(), &headers);
    charge(&state, &caller).await?;

    let ticket = state.sessions.add_iteration(&session_id, &model.name, &text).await?;
    let iteration = state
        .coordinator
        .run_iteration(&session_id, model, &ticket, &text)
        .await?;

    info!(
        correlation_id = %correlation.as_str(),
        session_id = %session_id,
        model = %model.name,
        iteration = iteration.index,
        status = %iteration.status,
        "Iteration finished"
    );

    Ok(Json(IterateResponse {
        image_url: iteration.image_ref.as_deref().map(|key| state.images.public_url(key)),
        session_id,
        model: model.name.clone(),
        iteration: iteration.index,
        iteration_count: ticket.iteration_count,
        warning: ticket.warning,
        status: iteration.status,
        image_ref: iteration.image_ref,
        error: iteration.error,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        models: state.registry.len(),
    })
}

/// Serve a stored image by key
pub async fn image(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.images.load(&key).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, response::base64::content_type(&key))],
            Body::from(bytes),
        )
            .into_response(),
        Err(ImageError::NotFound(_)) | Err(ImageError::InvalidKey(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => AppError::Internal(e.to_string()).into_response(),
    }
}

pub(crate) fn status_view(job: &Job, images: &dyn response::ImageStore) -> StatusResponse {
    StatusResponse {
        job_id: job.id.clone(),
        status: job.status(),
        total_models: job.total_models,
        completed_models: job.completed_models(),
        created_at: job.created_at,
        prompt: job.prompt.text.clone(),
        results: job
            .results
            .iter()
            .map(|slot| SlotView {
                index: slot.index,
                model: slot.model.clone(),
                status: slot.status,
                image_url: slot.image_ref.as_deref().map(|key| images.public_url(key)),
                image_ref: slot.image_ref.clone(),
                error: slot.error.clone(),
                started_at: slot.started_at,
                completed_at: slot.completed_at,
            })
            .collect(),
    }
}

fn validate_prompt(prompt: Option<&str>, max_length: usize) -> Result<String> {
    let text = prompt.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(AppError::PromptRequired);
    }
    if text.chars().count() > max_length {
        return Err(AppError::PromptTooLong { max_length });
    }
    Ok(text.to_string())
}

fn validate_range(field: &str, value: Option<f32>, min: f32, max: f32) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(AppError::Validation {
            field: field.to_string(),
            message: format!("{} must be between {} and {}", field, min, max),
        }),
        _ => Ok(()),
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation {
            field: field.to_string(),
            message: format!("{} is required", field),
        })
}

/// Explicit caller id, else the first `X-Forwarded-For` hop
fn caller_identity(explicit: Option<&str>, headers: &HeaderMap) -> String {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(UNKNOWN_CALLER)
        .to_string()
}

async fn charge(state: &AppState, caller: &str) -> Result<()> {
    match state.rate_limiter.check_and_consume(caller).await? {
        Decision::Allowed => Ok(()),
        Decision::Denied { retry_after, .. } => Err(AppError::RateLimitExceeded {
            retry_after_secs: retry_after.as_secs().max(1),
        }),
    }
}
