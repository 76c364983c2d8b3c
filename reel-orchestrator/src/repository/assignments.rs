//! Encoding assignment repository

use async_trait::async_trait;
use reel_core::domain::encoding::{AssignmentStatus, EncodingAssignment, TranscodeProfile};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RepoError, RepoResult};

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, assignment: &EncodingAssignment) -> RepoResult<()>;
    async fn update(&self, assignment: &EncodingAssignment) -> RepoResult<()>;
    async fn get(&self, id: Uuid) -> RepoResult<EncodingAssignment>;
    /// Assignments that were in flight when the process last stopped.
    async fn list_active(&self) -> RepoResult<Vec<EncodingAssignment>>;
}

/// Postgres-backed assignment repository
pub struct PgAssignmentRepository {
    pool: PgPool,
}

impl PgAssignmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(status: AssignmentStatus) -> &'static str {
    match status {
        AssignmentStatus::Pending => "Pending",
        AssignmentStatus::Running => "Running",
        AssignmentStatus::Completed => "Completed",
        AssignmentStatus::Failed => "Failed",
    }
}

fn status_from_str(s: &str) -> RepoResult<AssignmentStatus> {
    match s {
        "Pending" => Ok(AssignmentStatus::Pending),
        "Running" => Ok(AssignmentStatus::Running),
        "Completed" => Ok(AssignmentStatus::Completed),
        "Failed" => Ok(AssignmentStatus::Failed),
        other => Err(RepoError::Storage(format!("unknown assignment status: {}", other))),
    }
}

fn row_to_assignment(row: &sqlx::postgres::PgRow) -> RepoResult<EncodingAssignment> {
    let status: String = row.try_get("status")?;
    let profile: serde_json::Value = row.try_get("profile")?;
    let profile: TranscodeProfile = serde_json::from_value(profile)?;
    let progress: f32 = row.try_get("progress_percent")?;
    let output_size: Option<i64> = row.try_get("output_size")?;
    Ok(EncodingAssignment {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        encoder_id: row.try_get("encoder_id")?,
        status: status_from_str(&status)?,
        source_path: row.try_get("source_path")?,
        profile,
        progress_percent: progress,
        output_path: row.try_get("output_path")?,
        output_size: output_size.map(|s| s as u64),
        error: row.try_get("error")?,
        assigned_at: row.try_get("assigned_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl AssignmentRepository for PgAssignmentRepository {
    async fn create(&self, assignment: &EncodingAssignment) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO assignments
                (id, execution_id, encoder_id, status, source_path, profile, progress_percent,
                 output_path, output_size, error, assigned_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.execution_id)
        .bind(&assignment.encoder_id)
        .bind(status_to_str(assignment.status))
        .bind(&assignment.source_path)
        .bind(serde_json::to_value(&assignment.profile)?)
        .bind(assignment.progress_percent)
        .bind(&assignment.output_path)
        .bind(assignment.output_size.map(|s| s as i64))
        .bind(&assignment.error)
        .bind(assignment.assigned_at)
        .bind(assignment.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, assignment: &EncodingAssignment) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET status = $2, progress_percent = $3, output_path = $4, output_size = $5,
                error = $6, finished_at = $7
            WHERE id = $1
            "#,
        )
        .bind(assignment.id)
        .bind(status_to_str(assignment.status))
        .bind(assignment.progress_percent)
        .bind(&assignment.output_path)
        .bind(assignment.output_size.map(|s| s as i64))
        .bind(&assignment.error)
        .bind(assignment.finished_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("assignment {}", assignment.id)));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<EncodingAssignment> {
        let row = sqlx::query(
            "SELECT id, execution_id, encoder_id, status, source_path, profile, progress_percent,
                    output_path, output_size, error, assigned_at, finished_at
             FROM assignments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::NotFound(format!("assignment {}", id)))?;
        row_to_assignment(&row)
    }

    async fn list_active(&self) -> RepoResult<Vec<EncodingAssignment>> {
        let rows = sqlx::query(
            "SELECT id, execution_id, encoder_id, status, source_path, profile, progress_percent,
                    output_path, output_size, error, assigned_at, finished_at
             FROM assignments WHERE status IN ('Pending', 'Running') ORDER BY assigned_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_assignment).collect()
    }
}
