//! API module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod breakers;
pub mod encoders;
pub mod error;
pub mod executions;
pub mod health;
pub mod requests;
pub mod templates;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::dispatch::EncoderDispatcher;
use crate::engine::{CircuitBreakerRegistry, PipelineEngine, StepRegistry};
use crate::repository::{ExecutionRepository, TemplateRepository};
use crate::service::MediaService;

/// Everything the handlers need, injected at startup
#[derive(Clone)]
pub struct AppState {
    pub media: Arc<MediaService>,
    pub engine: Arc<PipelineEngine>,
    pub dispatcher: Arc<EncoderDispatcher>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub registry: Arc<StepRegistry>,
    pub templates: Arc<dyn TemplateRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Request endpoints
        .route("/request/create", post(requests::submit_request))
        .route("/request/list", get(requests::list_requests))
        .route("/request/{id}", get(requests::get_request))
        // Template endpoints
        .route("/template/create", post(templates::create_template))
        .route("/template/list", get(templates::list_templates))
        .route("/template/{id}", get(templates::get_template))
        // Execution endpoints
        .route("/execution/start", post(executions::start_execution))
        .route("/execution/{id}", get(executions::get_execution))
        .route("/execution/{id}/cancel", post(executions::cancel_execution))
        .route("/execution/{id}/resume", post(executions::resume_execution))
        // Fleet and breaker visibility
        .route("/encoder/list", get(encoders::list_encoders))
        .route("/breaker/list", get(breakers::list_breakers))
        .route("/breaker/{service}/reset", post(breakers::reset_breaker))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
