//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod signal;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/api/pipeline/create", post(pipeline::create_pipeline))
        .route("/api/pipeline/list", get(pipeline::list_pipelines))
        .route("/api/pipeline/{id}", get(pipeline::get_pipeline))
        // Signal endpoints
        .route("/api/pipeline/{id}/approval", post(signal::submit_approval))
        .route("/api/pipeline/{id}/validation", post(signal::submit_validation))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
