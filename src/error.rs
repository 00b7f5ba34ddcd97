//! Common error types for the job engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::jobs::JobError;
use crate::quota::QuotaError;
use crate::sessions::SessionError;
use crate::store::StoreError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Prompt is required")]
    PromptRequired,

    #[error("Prompt is too long (maximum {max_length} characters)")]
    PromptTooLong { max_length: usize },

    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Invalid JSON in request body: {0}")]
    InvalidJson(String),

    #[error("Your prompt contains inappropriate content and cannot be processed.")]
    InappropriateContent,

    #[error("Rate limit exceeded. Please try again in {} minute(s).", .retry_after_secs.div_ceil(60))]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Model '{model}' is not part of session {session_id}")]
    ModelNotInSession { session_id: String, model: String },

    #[error("Iteration limit of {max} reached for model '{model}'")]
    IterationLimit { model: String, max: u32 },

    #[error("No image models are enabled")]
    NoModelsEnabled,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format: a machine-readable code plus a human message
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    /// HTTP status and machine-readable code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::PromptRequired => (StatusCode::BAD_REQUEST, "PROMPT_REQUIRED"),
            AppError::PromptTooLong { .. } => (StatusCode::BAD_REQUEST, "PROMPT_TOO_LONG"),
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON"),
            AppError::InappropriateContent => (StatusCode::BAD_REQUEST, "INAPPROPRIATE_CONTENT"),
            AppError::RateLimitExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            AppError::IterationLimit { .. } => (StatusCode::BAD_REQUEST, "ITERATION_LIMIT_REACHED"),
            AppError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            AppError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            AppError::ModelNotInSession { .. } => (StatusCode::NOT_FOUND, "MODEL_NOT_IN_SESSION"),
            AppError::NoModelsEnabled => (StatusCode::SERVICE_UNAVAILABLE, "NO_MODELS_ENABLED"),
            AppError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            AppError::Config(_) | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            AppError::PromptRequired => Some("Please provide a text prompt to generate images.".to_string()),
            AppError::PromptTooLong { max_length } => Some(format!(
                "Please shorten your prompt to {} characters or less.",
                max_length
            )),
            AppError::InappropriateContent => {
                Some("Please revise your prompt to remove inappropriate content.".to_string())
            }
            AppError::RateLimitExceeded { .. } => {
                Some("Too many requests. Please wait and try again.".to_string())
            }
            AppError::JobNotFound(id) => Some(format!(
                "The job with ID '{}' could not be found. It may have expired.",
                id
            )),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Infrastructure details stay in the logs
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!(error = %self, "Request failed on unavailable dependency");
            "Service temporarily unavailable".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: code,
            message,
            details: self.details(),
            retry_after: match &self {
                AppError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
            max_length: match &self {
                AppError::PromptTooLong { max_length } => Some(*max_length),
                _ => None,
            },
            max_iterations: match &self {
                AppError::IterationLimit { max, .. } => Some(*max),
                _ => None,
            },
            field: match &self {
                AppError::Validation { field, .. } => Some(field.clone()),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => AppError::JobNotFound(id),
            JobError::Store(e) => AppError::Storage(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => AppError::SessionNotFound(id),
            SessionError::UnknownModel { session_id, model } => {
                AppError::ModelNotInSession { session_id, model }
            }
            SessionError::LimitReached { model, max } => AppError::IterationLimit { model, max },
            SessionError::Store(e) => AppError::Storage(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Store(e) => AppError::Storage(e),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
