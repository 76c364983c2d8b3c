//! Transcode step
//!
//! Dispatches the downloaded file to the encoder fleet and waits for the
//! terminal result. Capacity problems (no encoders, all busy) come back as
//! ordinary retryable failures, so the standard retry machinery spaces out
//! re-dispatch attempts; the dispatcher itself never queues.

use std::sync::Arc;

use async_trait::async_trait;
use reel_core::domain::encoding::TranscodeProfile;
use reel_core::domain::execution::PipelineContext;
use reel_core::domain::media::ItemStatus;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::dispatch::{AssignmentResult, EncoderDispatcher};
use crate::engine::step::{ConfigError, Step, StepError, StepOutcome};
use crate::service::MediaService;

use super::{context_str, context_uuid};

pub struct TranscodeStep {
    dispatcher: Arc<EncoderDispatcher>,
    media: Arc<MediaService>,
}

impl TranscodeStep {
    pub fn new(dispatcher: Arc<EncoderDispatcher>, media: Arc<MediaService>) -> Self {
        Self { dispatcher, media }
    }

    fn profile_from(config: &Map<String, Value>) -> Result<TranscodeProfile, String> {
        match config.get("profile") {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("profile does not parse: {}", e)),
            None => Ok(TranscodeProfile::default()),
        }
    }
}

#[async_trait]
impl Step for TranscodeStep {
    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError> {
        Self::profile_from(config).map(|_| ()).map_err(ConfigError)
    }

    async fn execute(&self, context: &PipelineContext, config: &Map<String, Value>) -> StepOutcome {
        let item_id = match context_uuid(context, "item.id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        let execution_id = match context_uuid(context, "execution_id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        let source_path = match context_str(context, "download.path") {
            Ok(path) => path.to_string(),
            Err(e) => return StepOutcome::Failed(e),
        };
        let profile = match Self::profile_from(config) {
            Ok(profile) => profile,
            Err(reason) => return StepOutcome::Failed(StepError::permanent(reason)),
        };

        if let Err(e) = self
            .media
            .set_item_status(item_id, ItemStatus::Encoding)
            .await
        {
            return StepOutcome::Failed(StepError::retryable(format!(
                "could not update item {}: {}",
                item_id, e
            )));
        }

        let handle = match self
            .dispatcher
            .dispatch(execution_id, &source_path, profile)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return StepOutcome::Failed(StepError::retryable(format!(
                    "transcode dispatch failed: {}",
                    e
                )));
            }
        };
        info!(
            "assignment {} dispatched to encoder {} for item {}",
            handle.assignment_id, handle.encoder_id, item_id
        );

        let encoder_id = handle.encoder_id.clone();
        match handle.completion.await {
            Ok(AssignmentResult::Completed {
                output_path,
                output_size,
            }) => {
                let mut output = Map::new();
                output.insert(
                    "transcode".to_string(),
                    json!({
                        "output_path": output_path,
                        "output_size": output_size,
                        "encoder_id": encoder_id,
                    }),
                );
                StepOutcome::success(output)
            }
            Ok(AssignmentResult::Failed { error }) => {
                StepOutcome::Failed(StepError::retryable(format!("transcode failed: {}", error)))
            }
            // The dispatcher dropped the waiter without resolving it;
            // treat like any infrastructure failure.
            Err(_) => StepOutcome::Failed(StepError::retryable(
                "dispatcher dropped the assignment before it resolved",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{MemoryAssignmentRepository, MemoryMediaRepository};
    use reel_core::dto::api::SubmitRequest;
    use reel_core::protocol::ServerMessage;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn context_with_download(media: &MediaService) -> (PipelineContext, Uuid) {
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
        context.insert_field("execution_id", json!(Uuid::new_v4().to_string()));
        context.insert_field("download", json!({ "path": "/work/in/heat.mkv" }));
        (context, item.id)
    }

    fn dispatcher() -> Arc<EncoderDispatcher> {
        Arc::new(EncoderDispatcher::new(
            MemoryAssignmentRepository::new(),
            Duration::from_secs(60),
        ))
    }

    /// Drains the encoder's channel and resolves every assignment it sees.
    fn run_fake_encoder(
        dispatcher: Arc<EncoderDispatcher>,
        mut rx: mpsc::Receiver<ServerMessage>,
        succeed: bool,
    ) {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let ServerMessage::JobAssign { assignment } = message {
                    if succeed {
                        dispatcher
                            .handle_completed(assignment.id, "/work/out/heat.mkv".to_string(), 2048)
                            .await;
                    } else {
                        dispatcher
                            .handle_failed(assignment.id, "ffmpeg exited with 1".to_string())
                            .await;
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn test_transcode_completes_with_output() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.register("enc-1", 2, tx).await;
        run_fake_encoder(Arc::clone(&dispatcher), rx, true);

        let (context, item_id) = context_with_download(&media).await;
        let step = TranscodeStep::new(dispatcher, Arc::clone(&media));

        match step.execute(&context, &Map::new()).await {
            StepOutcome::Success { output, .. } => {
                assert_eq!(output["transcode"]["output_path"], json!("/work/out/heat.mkv"));
                assert_eq!(output["transcode"]["encoder_id"], json!("enc-1"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(media.item(item_id).await.unwrap().status, ItemStatus::Encoding);
    }

    #[tokio::test]
    async fn test_encoder_failure_is_retryable() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel(8);
        dispatcher.register("enc-1", 2, tx).await;
        run_fake_encoder(Arc::clone(&dispatcher), rx, false);

        let (context, _) = context_with_download(&media).await;
        let step = TranscodeStep::new(dispatcher, media);

        match step.execute(&context, &Map::new()).await {
            StepOutcome::Failed(error) => {
                assert!(error.retryable);
                assert!(error.message.contains("ffmpeg"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_encoders_is_retryable() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let (context, _) = context_with_download(&media).await;
        let step = TranscodeStep::new(dispatcher(), media);

        match step.execute(&context, &Map::new()).await {
            StepOutcome::Failed(error) => {
                assert!(error.retryable);
                assert!(error.message.contains("no encoders"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_profile_config_validated() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let step = TranscodeStep::new(dispatcher(), media);
        assert!(step.validate_config(&Map::new()).is_ok());

        let good = match json!({ "profile": TranscodeProfile::default() }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(step.validate_config(&good).is_ok());

        let bad = match json!({ "profile": { "name": 7 } }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(step.validate_config(&bad).is_err());
    }
}
