//! Deliver step
//!
//! Enqueues the finished artifact on the delivery queue and waits for the
//! drain to finish. Enqueueing is idempotent per item: a duplicate means
//! another path already owns the delivery, so the step reports Skipped and
//! the walk moves on.

use std::sync::Arc;

use async_trait::async_trait;
use reel_core::domain::delivery::{DeliveryJob, DeliveryTarget};
use reel_core::domain::execution::PipelineContext;
use reel_core::domain::media::ItemStatus;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::delivery::{DeliveryQueue, EnqueueResult};
use crate::engine::step::{ConfigError, Step, StepError, StepOutcome};
use crate::service::MediaService;

use super::{context_str, context_uuid};

pub struct DeliverStep {
    queue: Arc<DeliveryQueue>,
    media: Arc<MediaService>,
}

impl DeliverStep {
    pub fn new(queue: Arc<DeliveryQueue>, media: Arc<MediaService>) -> Self {
        Self { queue, media }
    }

    fn targets_from(config: &Map<String, Value>) -> Result<Vec<DeliveryTarget>, String> {
        let raw = config
            .get("targets")
            .ok_or_else(|| "targets is required".to_string())?;
        let targets: Vec<DeliveryTarget> = serde_json::from_value(raw.clone())
            .map_err(|e| format!("targets does not parse: {}", e))?;
        if targets.is_empty() {
            return Err("targets must not be empty".to_string());
        }
        Ok(targets)
    }
}

#[async_trait]
impl Step for DeliverStep {
    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError> {
        Self::targets_from(config).map(|_| ()).map_err(ConfigError)
    }

    async fn execute(&self, context: &PipelineContext, config: &Map<String, Value>) -> StepOutcome {
        let item_id = match context_uuid(context, "item.id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        let request_id = match context_uuid(context, "request_id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        // Prefer the transcoded artifact, fall back to the raw download.
        let source_path = match context_str(context, "transcode.output_path")
            .or_else(|_| context_str(context, "download.path"))
        {
            Ok(path) => path.to_string(),
            Err(_) => {
                return StepOutcome::Failed(StepError::permanent(
                    "context has no artifact to deliver",
                ));
            }
        };
        let targets = match Self::targets_from(config) {
            Ok(targets) => targets,
            Err(reason) => return StepOutcome::Failed(StepError::permanent(reason)),
        };

        if let Err(e) = self
            .media
            .set_item_status(item_id, ItemStatus::Delivering)
            .await
        {
            return StepOutcome::Failed(StepError::retryable(format!(
                "could not update item {}: {}",
                item_id, e
            )));
        }

        let job = DeliveryJob {
            item_id,
            request_id,
            source_path,
            targets,
        };
        let done = match self.queue.enqueue(job).await {
            EnqueueResult::Accepted(done) => done,
            EnqueueResult::Duplicate => {
                return StepOutcome::Skipped {
                    reason: Some(format!("item {} already has a delivery in flight", item_id)),
                };
            }
        };

        let outcome = match done.await {
            Ok(outcome) => outcome,
            Err(_) => {
                return StepOutcome::Failed(StepError::retryable(
                    "delivery queue dropped the job before it resolved",
                ));
            }
        };

        let delivered: Vec<&str> = outcome
            .results
            .iter()
            .filter(|r| r.ok)
            .map(|r| r.target.as_str())
            .collect();
        if !outcome.succeeded() {
            return StepOutcome::Failed(StepError::for_service(
                "all delivery targets failed",
                "transfer",
            ));
        }
        info!(
            "item {} delivered to {} of {} target(s)",
            item_id,
            delivered.len(),
            outcome.results.len()
        );

        let mut output = Map::new();
        output.insert(
            "deliver".to_string(),
            json!({
                "delivered": delivered,
                "targets_total": outcome.results.len(),
            }),
        );
        StepOutcome::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ArtifactShipper;
    use crate::repository::memory::MemoryMediaRepository;
    use reel_core::dto::api::SubmitRequest;
    use uuid::Uuid;

    /// Fails every target whose name starts with "bad".
    struct NameShipper;

    #[async_trait]
    impl ArtifactShipper for NameShipper {
        async fn ship(&self, _source: &str, target: &DeliveryTarget) -> anyhow::Result<()> {
            if target.name.starts_with("bad") {
                anyhow::bail!("target unreachable");
            }
            Ok(())
        }
    }

    async fn context_with_artifact(media: &MediaService) -> (PipelineContext, Uuid) {
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
        context.insert_field("transcode", json!({ "output_path": "/work/out/heat.mkv" }));
        (context, item.id)
    }

    fn config(targets: &[&str]) -> Map<String, Value> {
        let targets: Vec<Value> = targets
            .iter()
            .map(|name| json!({ "name": name, "root": format!("/mnt/{}", name), "profile": "flat" }))
            .collect();
        match json!({ "targets": targets }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_delivers_and_marks_item_available() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let queue = DeliveryQueue::start(1, 8, Arc::new(NameShipper), Arc::clone(&media));
        let (context, item_id) = context_with_artifact(&media).await;
        let step = DeliverStep::new(queue, Arc::clone(&media));

        match step.execute(&context, &config(&["bad-nas", "good-nas"])).await {
            StepOutcome::Success { output, .. } => {
                assert_eq!(output["deliver"]["delivered"], json!(["good-nas"]));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // The queue's completion side effect moved the item to Available.
        assert_eq!(
            media.item(item_id).await.unwrap().status,
            ItemStatus::Available
        );
    }

    #[tokio::test]
    async fn test_all_targets_failed() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let queue = DeliveryQueue::start(1, 8, Arc::new(NameShipper), Arc::clone(&media));
        let (context, _) = context_with_artifact(&media).await;
        let step = DeliverStep::new(queue, media);

        match step.execute(&context, &config(&["bad-1", "bad-2"])).await {
            StepOutcome::Failed(error) => {
                assert!(error.message.contains("all delivery targets failed"));
                assert_eq!(error.service.as_deref(), Some("transfer"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact_is_permanent() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let queue = DeliveryQueue::start(1, 8, Arc::new(NameShipper), Arc::clone(&media));
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
        let step = DeliverStep::new(queue, media);

        match step.execute(&context, &config(&["good"])).await {
            StepOutcome::Failed(error) => assert!(!error.retryable),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_targets_config_required() {
        assert!(DeliverStep::targets_from(&Map::new()).is_err());
        assert!(DeliverStep::targets_from(&config(&[])).is_err());
        assert!(DeliverStep::targets_from(&config(&["nas"])).is_ok());
    }
}
