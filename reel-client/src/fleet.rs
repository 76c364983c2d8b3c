//! Encoder fleet and circuit breaker endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use reel_core::domain::breaker::CircuitBreakerRecord;
use reel_core::domain::encoding::EncoderSnapshot;

impl OrchestratorClient {
    /// List connected encoders with capacity and liveness
    pub async fn list_encoders(&self) -> Result<Vec<EncoderSnapshot>> {
        let url = format!("{}/encoder/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List circuit breaker records
    pub async fn list_breakers(&self) -> Result<Vec<CircuitBreakerRecord>> {
        let url = format!("{}/breaker/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Reset a circuit breaker, deleting its record
    pub async fn reset_breaker(&self, service: &str) -> Result<()> {
        let url = format!("{}/breaker/{}/reset", self.base_url, service);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
