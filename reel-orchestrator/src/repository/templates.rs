//! Pipeline template repository
//!
//! Templates are stored as their compiled arena JSON and re-validated on
//! load; a template that fails structural validation never reaches the
//! executor.

use async_trait::async_trait;
use reel_core::domain::template::PipelineTemplate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RepoError, RepoResult};

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn save(&self, template: &PipelineTemplate) -> RepoResult<()>;
    async fn get(&self, id: Uuid) -> RepoResult<PipelineTemplate>;
    async fn find_by_name(&self, name: &str) -> RepoResult<Option<PipelineTemplate>>;
    async fn list(&self) -> RepoResult<Vec<PipelineTemplate>>;
}

/// Postgres-backed template repository
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_template(row: &sqlx::postgres::PgRow) -> RepoResult<PipelineTemplate> {
    let doc: serde_json::Value = row.try_get("doc")?;
    let template: PipelineTemplate = serde_json::from_value(doc)?;
    template
        .validate()
        .map_err(|e| RepoError::Storage(format!("stored template invalid: {}", e)))?;
    Ok(template)
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn save(&self, template: &PipelineTemplate) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO templates (id, name, doc)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = $2, doc = $3
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(serde_json::to_value(template)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<PipelineTemplate> {
        let row = sqlx::query("SELECT doc FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("template {}", id)))?;
        row_to_template(&row)
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Option<PipelineTemplate>> {
        let row = sqlx::query("SELECT doc FROM templates WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_template).transpose()
    }

    async fn list(&self) -> RepoResult<Vec<PipelineTemplate>> {
        let rows = sqlx::query("SELECT doc FROM templates ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_template).collect()
    }
}
