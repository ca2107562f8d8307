//! Signal API Handlers
//!
//! Approval and validation decisions for production pipelines.

use axum::{
    Json,
    extract::{Path, State},
};
use gantry_core::domain::signal::{ApprovalDecision, ValidationDecision};
use gantry_core::dto::signal::SignalReceipt;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{AppState, pipeline_service};

/// POST /api/pipeline/{id}/approval
pub async fn submit_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decision): Json<ApprovalDecision>,
) -> ApiResult<Json<SignalReceipt>> {
    tracing::info!(
        "Approval for pipeline {}: approved={} by {}",
        id,
        decision.approved,
        decision.approver
    );

    let receipt = pipeline_service::submit_approval(&state, id, decision).await?;

    Ok(Json(receipt))
}

/// POST /api/pipeline/{id}/validation
pub async fn submit_validation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(decision): Json<ValidationDecision>,
) -> ApiResult<Json<SignalReceipt>> {
    tracing::info!(
        "Validation for pipeline {}: validated={} by {}",
        id,
        decision.validated,
        decision.validator
    );

    let receipt = pipeline_service::submit_validation(&state, id, decision).await?;

    Ok(Json(receipt))
}
