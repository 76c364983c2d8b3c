//! Encoder fleet API handlers

use axum::{Json, extract::State};
use reel_core::domain::encoding::EncoderSnapshot;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /encoder/list
/// Connected encoders with capacity and liveness
pub async fn list_encoders(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<EncoderSnapshot>>> {
    tracing::debug!("Listing encoders");
    Ok(Json(state.dispatcher.snapshots().await))
}
