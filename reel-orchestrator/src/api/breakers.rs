//! Circuit breaker API handlers
//!
//! Read-only visibility into per-service breaker state, plus the explicit
//! operator reset that is the only way a record is ever deleted.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use reel_core::domain::breaker::CircuitBreakerRecord;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /breaker/list
pub async fn list_breakers(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CircuitBreakerRecord>>> {
    tracing::debug!("Listing circuit breakers");
    Ok(Json(state.breakers.snapshot().await))
}

/// POST /breaker/{service}/reset
pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Resetting circuit breaker for {}", service);
    state.breakers.reset(&service).await?;
    Ok(StatusCode::NO_CONTENT)
}
