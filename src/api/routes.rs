//! Router assembly

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::middleware::{BurstGuardLayer, CorrelationLayer};
use crate::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let burst = BurstGuardLayer::new(state.settings.server.burst_per_second, state.settings.server.burst_size);

    // Layers run outermost last
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/status/:job_id", get(handlers::status))
        .route("/iterate", post(handlers::iterate))
        .route("/images/*key", get(handlers::image))
        .route("/health", get(handlers::health))
        .layer(CorrelationLayer)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(burst)
        .with_state(state)
}
