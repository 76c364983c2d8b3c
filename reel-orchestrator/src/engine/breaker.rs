//! Circuit breaker registry
//!
//! Owns the live breaker records for every external service and serializes
//! mutations per service key: two executions recording failures against the
//! same service go through the same write lock, so neither increment is
//! lost. Records are created lazily Closed and written through to the
//! repository on every transition so they survive restarts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use reel_core::domain::breaker::{BreakerPolicy, CircuitBreakerRecord, CircuitState};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::repository::{BreakerRepository, RepoResult};

pub struct CircuitBreakerRegistry {
    policy: BreakerPolicy,
    records: RwLock<HashMap<String, CircuitBreakerRecord>>,
    repository: Arc<dyn BreakerRepository>,
}

impl CircuitBreakerRegistry {
    pub fn new(policy: BreakerPolicy, repository: Arc<dyn BreakerRepository>) -> Self {
        Self {
            policy,
            records: RwLock::new(HashMap::new()),
            repository,
        }
    }

    /// Load persisted breaker state, typically once at startup.
    pub async fn hydrate(&self) -> RepoResult<usize> {
        let stored = self.repository.load_all().await?;
        let count = stored.len();
        let mut records = self.records.write().await;
        for record in stored {
            records.insert(record.service.clone(), record);
        }
        Ok(count)
    }

    /// Whether calls to the service should currently be attempted.
    ///
    /// Performs the lazy Open → HalfOpen transition, which is a mutation,
    /// so this takes the write lock.
    pub async fn check_available(&self, service: &str) -> bool {
        let mut records = self.records.write().await;
        let record = records
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(service));
        let before = record.state;
        let available = record.check_available(Utc::now());
        if record.state != before {
            info!(
                "circuit breaker for {} transitioned {} -> {}",
                service, before, record.state
            );
            self.persist(record).await;
        }
        available
    }

    /// Current state without side effects (no lazy transition).
    pub async fn state_of(&self, service: &str) -> CircuitState {
        self.records
            .read()
            .await
            .get(service)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn record_failure(&self, service: &str) {
        let mut records = self.records.write().await;
        let record = records
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(service));
        let before = record.state;
        record.record_failure(&self.policy, Utc::now());
        if record.state != before {
            warn!(
                "circuit breaker for {} opened after {} failure(s)",
                service, record.failures
            );
        }
        self.persist(record).await;
    }

    pub async fn record_success(&self, service: &str) {
        let mut records = self.records.write().await;
        let record = records
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreakerRecord::new(service));
        let before = record.state;
        record.record_success(&self.policy);
        if record.state != before {
            info!("circuit breaker for {} closed", service);
        }
        self.persist(record).await;
    }

    /// Remaining cooldown for an open breaker, for skip-until scheduling.
    pub async fn open_until(&self, service: &str) -> Option<chrono::DateTime<Utc>> {
        self.records
            .read()
            .await
            .get(service)
            .and_then(|r| (r.state == CircuitState::Open).then_some(r.opens_until))
            .flatten()
    }

    pub async fn snapshot(&self) -> Vec<CircuitBreakerRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.service.cmp(&b.service));
        records
    }

    /// Explicit operator reset: drops the record entirely.
    pub async fn reset(&self, service: &str) -> RepoResult<()> {
        self.records.write().await.remove(service);
        // Absent in storage is fine; reset is idempotent.
        match self.repository.delete(service).await {
            Ok(()) => Ok(()),
            Err(crate::repository::RepoError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, record: &CircuitBreakerRecord) {
        if let Err(e) = self.repository.save(record).await {
            warn!("failed to persist breaker state for {}: {}", record.service, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryBreakerRepository;

    fn registry() -> CircuitBreakerRegistry {
        let policy = BreakerPolicy {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown_secs: 60,
        };
        CircuitBreakerRegistry::new(policy, MemoryBreakerRepository::new())
    }

    #[tokio::test]
    async fn test_lazy_creation_closed() {
        let registry = registry();
        assert!(registry.check_available("indexer:nyx").await);
        assert_eq!(registry.state_of("indexer:nyx").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_threshold_opens_and_blocks() {
        let registry = registry();
        for _ in 0..3 {
            registry.record_failure("indexer:nyx").await;
        }
        assert_eq!(registry.state_of("indexer:nyx").await, CircuitState::Open);
        assert!(!registry.check_available("indexer:nyx").await);
        assert!(registry.open_until("indexer:nyx").await.is_some());
    }

    #[tokio::test]
    async fn test_state_persisted_across_registries() {
        let repository = MemoryBreakerRepository::new();
        let policy = BreakerPolicy {
            failure_threshold: 2,
            success_threshold: 1,
            cooldown_secs: 60,
        };
        {
            let registry = CircuitBreakerRegistry::new(policy, repository.clone());
            registry.record_failure("transfer:nas").await;
            registry.record_failure("transfer:nas").await;
        }
        let registry = CircuitBreakerRegistry::new(policy, repository);
        assert_eq!(registry.hydrate().await.unwrap(), 1);
        assert_eq!(registry.state_of("transfer:nas").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_concurrent_failures_all_counted() {
        let registry = Arc::new(CircuitBreakerRegistry::new(
            BreakerPolicy {
                failure_threshold: 100,
                success_threshold: 2,
                cooldown_secs: 60,
            },
            MemoryBreakerRepository::new(),
        ));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.record_failure("indexer:nyx").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let records = registry.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failures, 20);
    }

    #[tokio::test]
    async fn test_reset_removes_record() {
        let registry = registry();
        registry.record_failure("indexer:nyx").await;
        registry.reset("indexer:nyx").await.unwrap();
        assert!(registry.snapshot().await.is_empty());
        // Resetting an unknown service is a no-op.
        registry.reset("indexer:unknown").await.unwrap();
    }
}
