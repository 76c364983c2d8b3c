//! Pipeline template endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use reel_core::domain::template::{PipelineTemplate, TemplateSpec};
use uuid::Uuid;

impl OrchestratorClient {
    /// Compile and store a pipeline template from its authored form
    pub async fn create_template(&self, spec: TemplateSpec) -> Result<PipelineTemplate> {
        let url = format!("{}/template/create", self.base_url);
        let response = self.client.post(&url).json(&spec).send().await?;

        self.handle_response(response).await
    }

    /// Get a template by ID
    pub async fn get_template(&self, template_id: Uuid) -> Result<PipelineTemplate> {
        let url = format!("{}/template/{}", self.base_url, template_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all templates
    pub async fn list_templates(&self) -> Result<Vec<PipelineTemplate>> {
        let url = format!("{}/template/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
