//! Step contract
//!
//! Every unit of pipeline work implements `Step`. Config is validated once
//! at startup for every node of every template; `execute` receives the
//! accumulated context plus the node's config and reports exactly one
//! outcome.

use async_trait::async_trait;
use reel_core::domain::execution::PipelineContext;
use serde_json::{Map, Value};

/// Where the walk goes after a successful step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextDirective {
    /// Proceed to children, then the next sibling.
    Continue,
    /// Stop the entire walk, remaining siblings and children included,
    /// and complete the execution. Distinct from an empty success.
    Halt,
    /// Jump to a later sibling by name, skipping everything in between
    /// (the emitting node's children included). Forward-only; a name that
    /// does not resolve to a later sibling is a configuration error.
    Goto(String),
}

/// Error reported by a failing step
#[derive(Debug, Clone)]
pub struct StepError {
    pub message: String,
    /// External service the failure is attributed to, for breaker tracking.
    pub service: Option<String>,
    /// The step's own opinion on whether retrying can help.
    pub retryable: bool,
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            service: None,
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            service: None,
            retryable: false,
        }
    }

    pub fn for_service(message: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            service: Some(service.into()),
            retryable: true,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The single result a step reports
#[derive(Debug)]
pub enum StepOutcome {
    /// Work done; output merges into the context.
    Success {
        output: Map<String, Value>,
        next: NextDirective,
    },
    /// Nothing to do; the walk continues as if the step ran.
    Skipped { reason: Option<String> },
    /// Work failed; the retry machinery decides what happens next.
    Failed(StepError),
    /// Work cannot proceed without outside intervention; the execution
    /// parks as Paused until an operator resumes it.
    Paused { reason: String },
}

impl StepOutcome {
    pub fn success(output: Map<String, Value>) -> Self {
        StepOutcome::Success {
            output,
            next: NextDirective::Continue,
        }
    }

    pub fn halt(output: Map<String, Value>) -> Self {
        StepOutcome::Success {
            output,
            next: NextDirective::Halt,
        }
    }
}

/// Configuration error raised by `validate_config`
#[derive(Debug, thiserror::Error)]
#[error("invalid step config: {0}")]
pub struct ConfigError(pub String);

/// One named, typed unit of pipeline work
#[async_trait]
pub trait Step: Send + Sync {
    /// Reject malformed config at startup, before any execution runs.
    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError>;

    /// Perform the work against the current context.
    async fn execute(&self, context: &PipelineContext, config: &Map<String, Value>) -> StepOutcome;
}
