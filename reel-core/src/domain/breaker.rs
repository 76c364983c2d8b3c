//! Circuit breaker record and state machine
//!
//! One record per external service (indexer, download client, transfer
//! target). The transition logic lives here as pure methods over the record;
//! locking and persistence belong to the orchestrator's registry. The
//! OPEN → HALF_OPEN transition is lazy: it happens on the next availability
//! check after the cooldown elapses, not on a timer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "Closed",
            CircuitState::HalfOpen => "HalfOpen",
            CircuitState::Open => "Open",
        };
        write!(f, "{}", s)
    }
}

/// Thresholds and cooldown governing every breaker
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Consecutive failures in Closed before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive successes in HalfOpen before the breaker closes.
    pub success_threshold: u32,
    /// How long an open breaker stays open.
    pub cooldown_secs: i64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown_secs: 300,
        }
    }
}

/// Per-service breaker state
///
/// Created lazily Closed on first use; removed only by explicit reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub service: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub opens_until: Option<DateTime<Utc>>,
}

impl CircuitBreakerRecord {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            opens_until: None,
        }
    }

    /// Whether calls to the service should currently be attempted.
    ///
    /// Performs the lazy Open → HalfOpen transition when the cooldown has
    /// elapsed.
    pub fn check_available(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.opens_until.is_some_and(|until| now >= until) {
                    self.state = CircuitState::HalfOpen;
                    self.successes = 0;
                    self.opens_until = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a failed call against the service.
    pub fn record_failure(&mut self, policy: &BreakerPolicy, now: DateTime<Utc>) {
        self.last_failure = Some(now);
        match self.state {
            CircuitState::Closed => {
                self.failures += 1;
                if self.failures >= policy.failure_threshold {
                    self.trip(policy, now);
                }
            }
            // Any failure while probing re-opens immediately, no threshold.
            CircuitState::HalfOpen => self.trip(policy, now),
            CircuitState::Open => {}
        }
    }

    /// Record a successful call against the service.
    pub fn record_success(&mut self, policy: &BreakerPolicy) {
        match self.state {
            CircuitState::Closed => {
                self.failures = 0;
            }
            CircuitState::HalfOpen => {
                self.successes += 1;
                if self.successes >= policy.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failures = 0;
                    self.successes = 0;
                    self.opens_until = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&mut self, policy: &BreakerPolicy, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.successes = 0;
        self.opens_until = Some(now + Duration::seconds(policy.cooldown_secs));
    }
}
