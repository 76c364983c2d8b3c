//! Reel HTTP Client
//!
//! A type-safe HTTP client for the Reel orchestrator API, shared by the CLI
//! and anything else that talks to the orchestrator over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use reel_client::OrchestratorClient;
//! use reel_core::dto::api::SubmitRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reel_client::ClientError> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let request = client.submit_request(SubmitRequest {
//!         title: "Severance".to_string(),
//!         tmdb_id: 95396,
//!         year: Some(2022),
//!         items: vec![],
//!     }).await?;
//!
//!     println!("Submitted request: {}", request.id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod executions;
mod fleet;
mod requests;
mod templates;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Reel orchestrator API
///
/// Methods are grouped by domain:
/// - Media requests (submit, get, list)
/// - Templates (create, get, list)
/// - Executions (start, get, cancel, resume)
/// - Fleet visibility (encoders, circuit breakers)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a client with a custom reqwest Client (timeouts, proxies, ...)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
