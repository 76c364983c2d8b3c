//! Circuit breaker repository
//!
//! Breaker records survive restarts so a service that tripped the breaker
//! before a crash stays tripped after it. Upsert per service key.

use async_trait::async_trait;
use reel_core::domain::breaker::{CircuitBreakerRecord, CircuitState};
use sqlx::{PgPool, Row};

use super::{RepoError, RepoResult};

#[async_trait]
pub trait BreakerRepository: Send + Sync {
    async fn load_all(&self) -> RepoResult<Vec<CircuitBreakerRecord>>;
    async fn save(&self, record: &CircuitBreakerRecord) -> RepoResult<()>;
    async fn delete(&self, service: &str) -> RepoResult<()>;
}

/// Postgres-backed breaker repository
pub struct PgBreakerRepository {
    pool: PgPool,
}

impl PgBreakerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn state_to_str(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "Closed",
        CircuitState::HalfOpen => "HalfOpen",
        CircuitState::Open => "Open",
    }
}

fn state_from_str(s: &str) -> RepoResult<CircuitState> {
    match s {
        "Closed" => Ok(CircuitState::Closed),
        "HalfOpen" => Ok(CircuitState::HalfOpen),
        "Open" => Ok(CircuitState::Open),
        other => Err(RepoError::Storage(format!("unknown breaker state: {}", other))),
    }
}

#[async_trait]
impl BreakerRepository for PgBreakerRepository {
    async fn load_all(&self) -> RepoResult<Vec<CircuitBreakerRecord>> {
        let rows = sqlx::query(
            "SELECT service, state, failures, successes, last_failure, opens_until FROM breakers",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                let failures: i32 = row.try_get("failures")?;
                let successes: i32 = row.try_get("successes")?;
                Ok(CircuitBreakerRecord {
                    service: row.try_get("service")?,
                    state: state_from_str(&state)?,
                    failures: failures as u32,
                    successes: successes as u32,
                    last_failure: row.try_get("last_failure")?,
                    opens_until: row.try_get("opens_until")?,
                })
            })
            .collect()
    }

    async fn save(&self, record: &CircuitBreakerRecord) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO breakers (service, state, failures, successes, last_failure, opens_until)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (service) DO UPDATE
            SET state = $2, failures = $3, successes = $4, last_failure = $5, opens_until = $6
            "#,
        )
        .bind(&record.service)
        .bind(state_to_str(record.state))
        .bind(record.failures as i32)
        .bind(record.successes as i32)
        .bind(record.last_failure)
        .bind(record.opens_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, service: &str) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM breakers WHERE service = $1")
            .bind(service)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("breaker {}", service)));
        }
        Ok(())
    }
}
