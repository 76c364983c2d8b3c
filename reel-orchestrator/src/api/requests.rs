//! Media request API handlers

use axum::{
    Json,
    extract::{Path, State},
};
use reel_core::domain::media::MediaRequest;
use reel_core::dto::api::{RequestDetail, SubmitRequest};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /request/create
/// Submit a new media request with its items
pub async fn submit_request(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<Json<MediaRequest>> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title cannot be empty".to_string()));
    }
    tracing::info!("Submitting request: {}", req.title);
    let request = state.media.submit(req).await?;
    Ok(Json(request))
}

/// GET /request/{id}
/// Request with items and the derived aggregate status
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RequestDetail>> {
    tracing::debug!("Getting request: {}", id);
    let detail = state.media.detail(id).await?;
    Ok(Json(detail))
}

/// GET /request/list
/// List all requests with derived statuses
pub async fn list_requests(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<RequestDetail>>> {
    tracing::debug!("Listing requests");
    let requests = state.media.list().await?;
    Ok(Json(requests))
}
