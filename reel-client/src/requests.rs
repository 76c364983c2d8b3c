//! Media request endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use reel_core::domain::media::MediaRequest;
use reel_core::dto::api::{RequestDetail, SubmitRequest};
use uuid::Uuid;

impl OrchestratorClient {
    /// Submit a new media request
    pub async fn submit_request(&self, req: SubmitRequest) -> Result<MediaRequest> {
        let url = format!("{}/request/create", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a request with its items and derived aggregate status
    pub async fn get_request(&self, request_id: Uuid) -> Result<RequestDetail> {
        let url = format!("{}/request/{}", self.base_url, request_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all requests
    pub async fn list_requests(&self) -> Result<Vec<RequestDetail>> {
        let url = format!("{}/request/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
