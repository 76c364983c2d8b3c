//! Retry strategy
//!
//! Classifies step failures and decides whether, and when, the failing node
//! runs again. Classification is substring-based and fails open: an error
//! nobody recognizes is treated as transient and retried, not abandoned.
//!
//! Two deferral shapes exist: `Retry` consumes an attempt and uses
//! exponential backoff; `Defer` (issued while a service's breaker is open)
//! waits out the cooldown without touching the attempt budget.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reel_core::domain::media::ItemStatus;
use serde::{Deserialize, Serialize};

use super::breaker::CircuitBreakerRegistry;
use super::step::StepError;

/// Classified failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Transient,
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        };
        write!(f, "{}", s)
    }
}

/// Classify an error message by known fragments, case-insensitively.
///
/// Order matters: rate-limit markers would otherwise match the broader
/// network buckets.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    const RATE_LIMIT: &[&str] = &["429", "too many requests", "rate limit"];
    const TIMEOUT: &[&str] = &["timeout", "timed out", "etimedout", "deadline"];
    const NETWORK: &[&str] = &[
        "econnrefused",
        "econnreset",
        "ehostunreach",
        "enetunreach",
        "connection refused",
        "connection reset",
        "broken pipe",
        "503",
        "502",
        "dns",
    ];
    const PERMANENT: &[&str] = &[
        "404",
        "not found",
        "401",
        "unauthorized",
        "403",
        "forbidden",
        "invalid credentials",
        "unsupported codec",
        "malformed",
    ];

    if RATE_LIMIT.iter().any(|f| lower.contains(f)) {
        ErrorKind::RateLimit
    } else if TIMEOUT.iter().any(|f| lower.contains(f)) {
        ErrorKind::Timeout
    } else if NETWORK.iter().any(|f| lower.contains(f)) {
        ErrorKind::Network
    } else if PERMANENT.iter().any(|f| lower.contains(f)) {
        ErrorKind::Permanent
    } else {
        ErrorKind::Transient
    }
}

/// Tunables for retry timing
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
    /// Fixed interval for items parked in the long-lived searching state.
    pub search_interval_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            search_interval_secs: 900,
        }
    }
}

/// What the executor should do with a failed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again at `at`; consumes one attempt.
    Retry { at: DateTime<Utc>, reason: String },
    /// Run again at `until` without consuming an attempt (breaker open).
    Defer { until: DateTime<Utc>, reason: String },
    /// Stop retrying; the executor applies required/continue-on-error policy.
    GiveUp { reason: String },
}

pub struct RetryStrategy {
    policy: RetryPolicy,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl RetryStrategy {
    pub fn new(policy: RetryPolicy, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { policy, breakers }
    }

    /// Decide retry timing for one failed attempt.
    ///
    /// `item_status` is the failing item's current pipeline state;
    /// `attempts` is how many attempts the node has consumed so far.
    pub async fn decide(
        &self,
        item_status: ItemStatus,
        attempts: u32,
        error: &StepError,
    ) -> RetryDecision {
        let kind = classify(&error.message);
        let searching = item_status == ItemStatus::Searching;

        // An item still hunting for a release retries forever on a fixed
        // interval: search exhaustion is not a pipeline failure.
        if searching {
            return RetryDecision::Retry {
                at: Utc::now() + Duration::seconds(self.policy.search_interval_secs),
                reason: format!("still searching ({} error)", kind),
            };
        }

        if kind == ErrorKind::Permanent || !error.retryable {
            return RetryDecision::GiveUp {
                reason: format!("permanent failure: {}", error.message),
            };
        }

        if attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("exhausted {} attempts", attempts),
            };
        }

        if kind == ErrorKind::Network {
            if let Some(service) = &error.service {
                if !self.breakers.check_available(service).await {
                    // Breaker open: wait out the cooldown without burning
                    // an attempt.
                    let until = self
                        .breakers
                        .open_until(service)
                        .await
                        .unwrap_or_else(|| Utc::now() + Duration::seconds(self.policy.base_delay_secs));
                    return RetryDecision::Defer {
                        until,
                        reason: format!("circuit breaker open for {}", service),
                    };
                }
                self.breakers.record_failure(service).await;
            }
        }

        RetryDecision::Retry {
            at: Utc::now() + self.backoff(attempts),
            reason: format!("{} error, attempt {}", kind, attempts + 1),
        }
    }

    /// Report a successful call so half-open breakers can close.
    pub async fn note_success(&self, service: &str) {
        self.breakers.record_success(service).await;
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.min(16);
        let delay = self
            .policy
            .base_delay_secs
            .saturating_mul(1i64 << exp)
            .min(self.policy.max_delay_secs);
        Duration::seconds(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryBreakerRepository;
    use reel_core::domain::breaker::BreakerPolicy;

    #[test]
    fn test_classification_fragments() {
        assert_eq!(classify("ECONNREFUSED"), ErrorKind::Network);
        assert_eq!(classify("429 too many requests"), ErrorKind::RateLimit);
        assert_eq!(classify("404 not found"), ErrorKind::Permanent);
        assert_eq!(classify("request timed out after 30s"), ErrorKind::Timeout);
        assert_eq!(classify("503 service unavailable"), ErrorKind::Network);
        assert_eq!(classify("something inexplicable"), ErrorKind::Transient);
    }

    fn strategy(policy: RetryPolicy) -> RetryStrategy {
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            BreakerPolicy {
                failure_threshold: 3,
                success_threshold: 2,
                cooldown_secs: 300,
            },
            MemoryBreakerRepository::new(),
        ));
        RetryStrategy::new(policy, breakers)
    }

    #[tokio::test]
    async fn test_permanent_gives_up() {
        let strategy = strategy(RetryPolicy::default());
        let decision = strategy
            .decide(ItemStatus::Downloading, 0, &StepError::retryable("404 not found"))
            .await;
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[tokio::test]
    async fn test_searching_retries_even_permanent() {
        let strategy = strategy(RetryPolicy::default());
        let decision = strategy
            .decide(ItemStatus::Searching, 99, &StepError::retryable("404 not found"))
            .await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let strategy = strategy(RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        });
        let decision = strategy
            .decide(ItemStatus::Encoding, 3, &StepError::retryable("flaky thing"))
            .await;
        assert!(matches!(decision, RetryDecision::GiveUp { .. }));
    }

    #[tokio::test]
    async fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_secs: 30,
            max_delay_secs: 600,
            search_interval_secs: 900,
        };
        let strategy = strategy(policy);
        let d0 = strategy.backoff(0);
        let d1 = strategy.backoff(1);
        let d9 = strategy.backoff(9);
        assert_eq!(d0, Duration::seconds(30));
        assert_eq!(d1, Duration::seconds(60));
        assert_eq!(d9, Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_open_breaker_defers_without_attempt() {
        let strategy = strategy(RetryPolicy::default());
        let error = StepError::for_service("ECONNREFUSED", "indexer:nyx");
        // Trip the breaker.
        for _ in 0..3 {
            strategy.breakers.record_failure("indexer:nyx").await;
        }
        let decision = strategy.decide(ItemStatus::Downloading, 1, &error).await;
        assert!(matches!(decision, RetryDecision::Defer { .. }));
    }

    #[tokio::test]
    async fn test_network_failure_recorded_against_breaker() {
        let strategy = strategy(RetryPolicy::default());
        let error = StepError::for_service("connection refused", "indexer:nyx");
        let decision = strategy.decide(ItemStatus::Downloading, 0, &error).await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));
        let records = strategy.breakers.snapshot().await;
        assert_eq!(records[0].failures, 1);
    }
}
