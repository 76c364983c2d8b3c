//! Download step
//!
//! Hands the selected release to the download daemon and polls it until the
//! file lands. The daemon owns the actual transfer; this step only watches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reel_core::domain::execution::PipelineContext;
use reel_core::domain::media::ItemStatus;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::engine::collaborators::{DownloadClient, DownloadState, Release};
use crate::engine::step::{ConfigError, Step, StepError, StepOutcome};
use crate::service::MediaService;

use super::context_uuid;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

pub struct DownloadStep {
    client: Arc<dyn DownloadClient>,
    media: Arc<MediaService>,
}

impl DownloadStep {
    pub fn new(client: Arc<dyn DownloadClient>, media: Arc<MediaService>) -> Self {
        Self { client, media }
    }
}

#[async_trait]
impl Step for DownloadStep {
    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError> {
        if let Some(interval) = config.get("poll_interval_secs") {
            if !interval.as_u64().is_some_and(|v| v > 0) {
                return Err(ConfigError(
                    "poll_interval_secs must be a positive integer".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, context: &PipelineContext, config: &Map<String, Value>) -> StepOutcome {
        let item_id = match context_uuid(context, "item.id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        // The search step leaves its pick under search.best.
        let release: Release = match context
            .lookup("search.best")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(release) => release,
            None => {
                return StepOutcome::Failed(StepError::permanent(
                    "context has no selected release under search.best",
                ));
            }
        };

        if let Err(e) = self
            .media
            .set_item_status(item_id, ItemStatus::Downloading)
            .await
        {
            return StepOutcome::Failed(StepError::retryable(format!(
                "could not update item {}: {}",
                item_id, e
            )));
        }

        let download_id = match self.client.grab(&release).await {
            Ok(id) => id,
            Err(e) => {
                return StepOutcome::Failed(StepError::for_service(
                    format!("grab failed: {:#}", e),
                    self.client.service_name(),
                ));
            }
        };
        info!(
            "download {} started for item {} ({})",
            download_id, item_id, release.title
        );

        let poll_interval = config
            .get("poll_interval_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        // The per-step timeout bounds this loop; a daemon that never
        // finishes surfaces as a timed-out step, not a hung walk.
        loop {
            match self.client.poll(&download_id).await {
                Ok(DownloadState::Downloading { progress }) => {
                    debug!("download {} at {:.1}%", download_id, progress);
                    tokio::time::sleep(Duration::from_secs(poll_interval)).await;
                }
                Ok(DownloadState::Complete { path, size_bytes }) => {
                    info!("download {} complete: {}", download_id, path);
                    let mut output = Map::new();
                    output.insert(
                        "download".to_string(),
                        json!({ "path": path, "size_bytes": size_bytes }),
                    );
                    return StepOutcome::success(output);
                }
                Ok(DownloadState::Failed { reason }) => {
                    return StepOutcome::Failed(StepError::for_service(
                        format!("download failed: {}", reason),
                        self.client.service_name(),
                    ));
                }
                Err(e) => {
                    return StepOutcome::Failed(StepError::for_service(
                        format!("download poll failed: {:#}", e),
                        self.client.service_name(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryMediaRepository;
    use reel_core::dto::api::SubmitRequest;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Daemon that reports a scripted sequence of poll states.
    struct FakeDownloader {
        grab_fails: bool,
        states: Vec<DownloadState>,
        polls: AtomicUsize,
    }

    impl FakeDownloader {
        fn completing() -> Arc<Self> {
            Arc::new(Self {
                grab_fails: false,
                states: vec![
                    DownloadState::Downloading { progress: 40.0 },
                    DownloadState::Complete {
                        path: "/work/in/episode.mkv".to_string(),
                        size_bytes: 4096,
                    },
                ],
                polls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                grab_fails: false,
                states: vec![DownloadState::Failed {
                    reason: "no peers".to_string(),
                }],
                polls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DownloadClient for FakeDownloader {
        fn service_name(&self) -> &str {
            "downloader"
        }

        async fn grab(&self, _release: &Release) -> anyhow::Result<String> {
            if self.grab_fails {
                anyhow::bail!("ECONNREFUSED");
            }
            Ok("dl-1".to_string())
        }

        async fn poll(&self, _download_id: &str) -> anyhow::Result<DownloadState> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.states[n.min(self.states.len() - 1)].clone())
        }
    }

    async fn context_with_release(media: &MediaService) -> (PipelineContext, Uuid) {
        let request = media
            .submit(SubmitRequest {
                title: "Heat".to_string(),
                tmdb_id: 949,
                year: Some(1995),
                items: vec![],
            })
            .await
            .unwrap();
        let item = media.detail(request.id).await.unwrap().items[0].clone();
        let mut context = PipelineContext::for_item(&request, &item);
        context.insert_field(
            "search",
            json!({
                "best": {
                    "title": "Heat.1995.2160p",
                    "indexer": "nyx",
                    "seeders": 12,
                    "size_bytes": 1,
                    "download_url": "magnet:?xt=test"
                }
            }),
        );
        (context, item.id)
    }

    fn config(poll_secs: u64) -> Map<String, Value> {
        match json!({ "poll_interval_secs": poll_secs }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_complete() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let (context, item_id) = context_with_release(&media).await;
        let step = DownloadStep::new(FakeDownloader::completing(), Arc::clone(&media));

        let outcome = step.execute(&context, &config(1)).await;
        match outcome {
            StepOutcome::Success { output, .. } => {
                assert_eq!(output["download"]["path"], json!("/work/in/episode.mkv"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let item = media.item(item_id).await.unwrap();
        assert_eq!(item.status, ItemStatus::Downloading);
    }

    #[tokio::test]
    async fn test_daemon_failure_attributed_to_service() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let (context, _) = context_with_release(&media).await;
        let step = DownloadStep::new(FakeDownloader::failing(), media);

        match step.execute(&context, &Map::new()).await {
            StepOutcome::Failed(error) => {
                assert!(error.message.contains("no peers"));
                assert_eq!(error.service.as_deref(), Some("downloader"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_release_is_permanent() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let request = media
            .submit(SubmitRequest {
                title: "Heat".to_string(),
                tmdb_id: 949,
                year: Some(1995),
                items: vec![],
            })
            .await
            .unwrap();
        let item = media.detail(request.id).await.unwrap().items[0].clone();
        let context = PipelineContext::for_item(&request, &item);
        let step = DownloadStep::new(FakeDownloader::completing(), media);

        match step.execute(&context, &Map::new()).await {
            StepOutcome::Failed(error) => assert!(!error.retryable),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_config_validation() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let step = DownloadStep::new(FakeDownloader::completing(), media);
        assert!(step.validate_config(&Map::new()).is_ok());
        assert!(step.validate_config(&config(5)).is_ok());
        let mut bad = Map::new();
        bad.insert("poll_interval_secs".to_string(), json!(0));
        assert!(step.validate_config(&bad).is_err());
    }
}
