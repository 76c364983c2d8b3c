//! External collaborator contracts
//!
//! Search indexers and download clients live outside this process; the
//! steps only see these traits. The HTTP implementations talk to whatever
//! proxy daemons the deployment points them at; tests substitute mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A release search query derived from the execution context
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// One candidate release returned by an indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub title: String,
    pub indexer: String,
    pub seeders: u32,
    pub size_bytes: u64,
    pub download_url: String,
}

/// Progress of a grabbed download
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    Downloading { progress: f32 },
    Complete { path: String, size_bytes: u64 },
    Failed { reason: String },
}

/// Queries release indexers
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Service name used for circuit breaker attribution.
    fn service_name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<Release>>;
}

/// Hands releases to a download daemon and polls them
#[async_trait]
pub trait DownloadClient: Send + Sync {
    fn service_name(&self) -> &str;

    /// Start the download; returns the daemon's handle for polling.
    async fn grab(&self, release: &Release) -> anyhow::Result<String>;

    async fn poll(&self, download_id: &str) -> anyhow::Result<DownloadState>;
}

/// Indexer-proxy-backed search provider
pub struct HttpSearchProvider {
    base_url: String,
    client: reqwest::Client,
    service: String,
}

impl HttpSearchProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            service: "indexer".to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn search(&self, query: &SearchQuery) -> anyhow::Result<Vec<Release>> {
        let url = format!("{}/api/search", self.base_url);
        let response = self.client.post(&url).json(query).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("search failed with status {}", response.status());
        }
        Ok(response.json().await?)
    }
}

/// Download-daemon-backed client
pub struct HttpDownloadClient {
    base_url: String,
    client: reqwest::Client,
    service: String,
}

impl HttpDownloadClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            service: "downloader".to_string(),
        }
    }
}

#[async_trait]
impl DownloadClient for HttpDownloadClient {
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn grab(&self, release: &Release) -> anyhow::Result<String> {
        let url = format!("{}/api/downloads", self.base_url);
        let response = self.client.post(&url).json(release).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("grab failed with status {}", response.status());
        }
        #[derive(Deserialize)]
        struct GrabResponse {
            id: String,
        }
        let grabbed: GrabResponse = response.json().await?;
        Ok(grabbed.id)
    }

    async fn poll(&self, download_id: &str) -> anyhow::Result<DownloadState> {
        let url = format!("{}/api/downloads/{}", self.base_url, download_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("poll failed with status {}", response.status());
        }
        Ok(response.json().await?)
    }
}
