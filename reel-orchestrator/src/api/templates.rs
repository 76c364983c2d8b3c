//! Pipeline template API handlers
//!
//! Templates are authored as a nested step tree and compiled to the arena
//! form on create. Compilation plus the registry check means a template
//! that reaches storage is guaranteed walkable.

use axum::{
    Json,
    extract::{Path, State},
};
use reel_core::domain::template::{PipelineTemplate, TemplateSpec};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /template/create
/// Compile and store a pipeline template
pub async fn create_template(
    State(state): State<AppState>,
    Json(spec): Json<TemplateSpec>,
) -> ApiResult<Json<PipelineTemplate>> {
    tracing::info!("Creating template: {}", spec.name);

    if let Some(existing) = state.templates.find_by_name(&spec.name).await? {
        return Err(ApiError::BadRequest(format!(
            "template {} already exists ({})",
            existing.name, existing.id
        )));
    }

    let template = PipelineTemplate::compile(spec)
        .map_err(|e| ApiError::BadRequest(format!("template does not compile: {}", e)))?;
    state.registry.check_template(&template)?;
    state.templates.save(&template).await?;

    Ok(Json(template))
}

/// GET /template/{id}
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineTemplate>> {
    tracing::debug!("Getting template: {}", id);
    let template = state.templates.get(id).await?;
    Ok(Json(template))
}

/// GET /template/list
pub async fn list_templates(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PipelineTemplate>>> {
    tracing::debug!("Listing templates");
    let templates = state.templates.list().await?;
    Ok(Json(templates))
}
