//! Repository layer
//!
//! The engine, dispatcher, and delivery queue only ever see these traits;
//! the storage engine behind them is interchangeable. Production uses the
//! Postgres implementations, tests use the in-memory ones. Every method is
//! an atomic read-modify-write on its key.

pub mod assignments;
pub mod breakers;
pub mod executions;
pub mod media;
pub mod memory;
pub mod templates;

pub use assignments::{AssignmentRepository, PgAssignmentRepository};
pub use breakers::{BreakerRepository, PgBreakerRepository};
pub use executions::{ExecutionRepository, PgExecutionRepository};
pub use media::{MediaRepository, PgMediaRepository};
pub use templates::{PgTemplateRepository, TemplateRepository};

use thiserror::Error;

/// Storage-agnostic repository error
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row not found".to_string()),
            other => RepoError::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::Storage(format!("serialization: {}", err))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
