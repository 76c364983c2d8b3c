//! Execution API handlers
//!
//! Start fans out one execution per unfinished item of the request; cancel
//! and resume act on a single execution. Detail includes the step log.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use reel_core::dto::api::{ExecutionDetail, StartExecution, StartExecutionResponse};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /execution/start
pub async fn start_execution(
    State(state): State<AppState>,
    Json(req): Json<StartExecution>,
) -> ApiResult<Json<StartExecutionResponse>> {
    tracing::info!(
        "Starting executions for request {} (template {})",
        req.request_id,
        req.template_id
    );
    let execution_ids = state.engine.start(req.request_id, req.template_id).await?;
    Ok(Json(StartExecutionResponse { execution_ids }))
}

/// GET /execution/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionDetail>> {
    tracing::debug!("Getting execution: {}", id);
    let execution = state.executions.get(id).await?;
    let steps = state.executions.steps_for(id).await?;
    Ok(Json(ExecutionDetail { execution, steps }))
}

/// POST /execution/{id}/cancel
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling execution: {}", id);
    state.engine.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /execution/{id}/resume
pub async fn resume_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Resuming execution: {}", id);
    state.engine.resume(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
