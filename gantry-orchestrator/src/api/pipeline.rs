//! Pipeline API Handlers
//!
//! HTTP endpoints for starting pipeline runs and reading their status.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use gantry_core::domain::status::PipelineStatus;
use gantry_core::dto::pipeline::{CreatePipelineRun, PipelineCreated, PipelineSummary};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{AppState, pipeline_service};

/// POST /api/pipeline/create
/// Start a new pipeline run
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipelineRun>,
) -> ApiResult<(StatusCode, Json<PipelineCreated>)> {
    tracing::info!("Creating pipeline for image: {}", req.image_name);

    let created = pipeline_service::create_pipeline(&state, req).await?;

    Ok((StatusCode::ACCEPTED, Json(created)))
}

/// GET /api/pipeline/list
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = pipeline_service::list_pipelines(&state).await?;

    Ok(Json(pipelines))
}

/// GET /api/pipeline/{id}
/// Full status of one run
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineStatus>> {
    tracing::debug!("Getting pipeline: {}", id);

    let status = pipeline_service::get_status(&state, id).await?;

    Ok(Json(status))
}
