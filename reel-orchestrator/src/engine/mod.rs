//! Pipeline engine
//!
//! Walks compiled step trees for in-flight executions. The executor owns
//! the walk; the registry maps step kinds to implementations; the retry
//! strategy and circuit breaker registry decide what happens when a step
//! fails. Everything the engine touches outside its own state goes through
//! the repository traits and the injected collaborators.

pub mod breaker;
pub mod collaborators;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod step;
pub mod steps;

pub use breaker::CircuitBreakerRegistry;
pub use executor::PipelineEngine;
pub use registry::StepRegistry;
pub use retry::{RetryPolicy, RetryStrategy};

use reel_core::domain::execution::ExecutionStatus;
use reel_core::domain::template::StepKind;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::RepoError;

/// Errors raised by the engine itself
///
/// Step failures are not errors at this level; they flow through the retry
/// machinery and end up in the execution's status. These are the
/// configuration and state problems that make a walk impossible.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no step implementation registered for kind {0}")]
    UnregisteredKind(StepKind),
    #[error("invalid config for step {step}: {reason}")]
    InvalidConfig { step: String, reason: String },
    #[error("execution {id} is {status}, cannot {action}")]
    InvalidState {
        id: Uuid,
        status: ExecutionStatus,
        action: &'static str,
    },
    #[error(transparent)]
    Repo(#[from] RepoError),
}
