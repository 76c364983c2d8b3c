//! Execution endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use reel_core::dto::api::{ExecutionDetail, StartExecution, StartExecutionResponse};
use uuid::Uuid;

impl OrchestratorClient {
    /// Start executions for a request: one per unfinished item
    pub async fn start_execution(
        &self,
        request_id: Uuid,
        template_id: Uuid,
    ) -> Result<StartExecutionResponse> {
        let url = format!("{}/execution/start", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&StartExecution {
                request_id,
                template_id,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get an execution with its step log
    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionDetail> {
        let url = format!("{}/execution/{}", self.base_url, execution_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel an execution
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        let url = format!("{}/execution/{}/cancel", self.base_url, execution_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Resume a paused execution
    pub async fn resume_execution(&self, execution_id: Uuid) -> Result<()> {
        let url = format!("{}/execution/{}/resume", self.base_url, execution_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
