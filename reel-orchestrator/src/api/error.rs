//! API error handling
//!
//! Unified error type and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::engine::EngineError;
use crate::repository::RepoError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(what) => ApiError::NotFound(what),
            RepoError::Conflict(what) => ApiError::BadRequest(what),
            RepoError::Storage(what) => ApiError::InternalError(what),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnregisteredKind(_) | EngineError::InvalidConfig { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            EngineError::InvalidState { .. } => ApiError::BadRequest(err.to_string()),
            EngineError::Repo(repo) => repo.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
