//! Execution repository
//!
//! Persists executions and their step logs. Context and cursor are written
//! together after every step so a crashed process resumes from the last
//! completed node.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_core::domain::execution::{
    ExecutionStatus, PipelineContext, PipelineExecution, StepExecution, StepOutcomeKind,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RepoError, RepoResult};

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &PipelineExecution) -> RepoResult<()>;
    async fn get(&self, id: Uuid) -> RepoResult<PipelineExecution>;
    async fn list_by_status(&self, status: ExecutionStatus) -> RepoResult<Vec<PipelineExecution>>;
    /// Persist the context and cursor after a completed node.
    async fn save_progress(
        &self,
        id: Uuid,
        context: &PipelineContext,
        cursor: Option<usize>,
    ) -> RepoResult<()>;
    async fn set_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> RepoResult<()>;
    async fn append_step(&self, record: &StepExecution) -> RepoResult<()>;
    async fn steps_for(&self, execution_id: Uuid) -> RepoResult<Vec<StepExecution>>;
}

/// Postgres-backed execution repository
pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "Running",
        ExecutionStatus::Paused => "Paused",
        ExecutionStatus::Completed => "Completed",
        ExecutionStatus::Failed => "Failed",
        ExecutionStatus::Cancelled => "Cancelled",
    }
}

fn status_from_str(s: &str) -> RepoResult<ExecutionStatus> {
    match s {
        "Running" => Ok(ExecutionStatus::Running),
        "Paused" => Ok(ExecutionStatus::Paused),
        "Completed" => Ok(ExecutionStatus::Completed),
        "Failed" => Ok(ExecutionStatus::Failed),
        "Cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(RepoError::Storage(format!("unknown execution status: {}", other))),
    }
}

fn outcome_to_str(outcome: StepOutcomeKind) -> &'static str {
    match outcome {
        StepOutcomeKind::Completed => "Completed",
        StepOutcomeKind::Failed => "Failed",
        StepOutcomeKind::Skipped => "Skipped",
        StepOutcomeKind::TimedOut => "TimedOut",
        StepOutcomeKind::Paused => "Paused",
    }
}

fn outcome_from_str(s: &str) -> RepoResult<StepOutcomeKind> {
    match s {
        "Completed" => Ok(StepOutcomeKind::Completed),
        "Failed" => Ok(StepOutcomeKind::Failed),
        "Skipped" => Ok(StepOutcomeKind::Skipped),
        "TimedOut" => Ok(StepOutcomeKind::TimedOut),
        "Paused" => Ok(StepOutcomeKind::Paused),
        other => Err(RepoError::Storage(format!("unknown step outcome: {}", other))),
    }
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> RepoResult<PipelineExecution> {
    let status: String = row.try_get("status")?;
    let context: serde_json::Value = row.try_get("context")?;
    let cursor: Option<i32> = row.try_get("cursor")?;
    let context = match context {
        serde_json::Value::Object(map) => PipelineContext::from_map(map),
        _ => return Err(RepoError::Storage("context is not an object".to_string())),
    };
    Ok(PipelineExecution {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        item_id: row.try_get("item_id")?,
        template_id: row.try_get("template_id")?,
        status: status_from_str(&status)?,
        context,
        cursor: cursor.map(|c| c as usize),
        error: row.try_get("error")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn create(&self, execution: &PipelineExecution) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, request_id, item_id, template_id, status, context, cursor, error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id)
        .bind(execution.request_id)
        .bind(execution.item_id)
        .bind(execution.template_id)
        .bind(status_to_str(execution.status))
        .bind(execution.context.as_value())
        .bind(execution.cursor.map(|c| c as i32))
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<PipelineExecution> {
        let row = sqlx::query(
            "SELECT id, request_id, item_id, template_id, status, context, cursor, error, started_at, finished_at
             FROM executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::NotFound(format!("execution {}", id)))?;
        row_to_execution(&row)
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> RepoResult<Vec<PipelineExecution>> {
        let rows = sqlx::query(
            "SELECT id, request_id, item_id, template_id, status, context, cursor, error, started_at, finished_at
             FROM executions WHERE status = $1 ORDER BY started_at ASC",
        )
        .bind(status_to_str(status))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn save_progress(
        &self,
        id: Uuid,
        context: &PipelineContext,
        cursor: Option<usize>,
    ) -> RepoResult<()> {
        let result = sqlx::query("UPDATE executions SET context = $2, cursor = $3 WHERE id = $1")
            .bind(id)
            .bind(context.as_value())
            .bind(cursor.map(|c| c as i32))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("execution {}", id)));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        let finished_at: Option<DateTime<Utc>> = status.is_terminal().then(Utc::now);
        let result = sqlx::query(
            "UPDATE executions SET status = $2, error = COALESCE($3, error), finished_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(status_to_str(status))
        .bind(error)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("execution {}", id)));
        }
        Ok(())
    }

    async fn append_step(&self, record: &StepExecution) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO step_executions
                (id, execution_id, step_name, position, outcome, error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.execution_id)
        .bind(&record.step_name)
        .bind(record.position as i32)
        .bind(outcome_to_str(record.outcome))
        .bind(&record.error)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn steps_for(&self, execution_id: Uuid) -> RepoResult<Vec<StepExecution>> {
        let rows = sqlx::query(
            "SELECT id, execution_id, step_name, position, outcome, error, started_at, finished_at
             FROM step_executions WHERE execution_id = $1 ORDER BY started_at ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let outcome: String = row.try_get("outcome")?;
                let position: i32 = row.try_get("position")?;
                Ok(StepExecution {
                    id: row.try_get("id")?,
                    execution_id: row.try_get("execution_id")?,
                    step_name: row.try_get("step_name")?,
                    position: position as usize,
                    outcome: outcome_from_str(&outcome)?,
                    error: row.try_get("error")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                })
            })
            .collect()
    }
}
