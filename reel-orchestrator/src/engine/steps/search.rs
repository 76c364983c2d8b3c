//! Search step
//!
//! Queries the indexer for candidate releases and picks the best one. The
//! item parks in the long-lived Searching state first, so a fruitless
//! search keeps the item retrying on a fixed interval instead of failing
//! the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use reel_core::domain::execution::PipelineContext;
use reel_core::domain::media::ItemStatus;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::engine::collaborators::{SearchProvider, SearchQuery};
use crate::engine::step::{ConfigError, Step, StepError, StepOutcome};
use crate::service::MediaService;

use super::context_uuid;

pub struct SearchStep {
    provider: Arc<dyn SearchProvider>,
    media: Arc<MediaService>,
}

impl SearchStep {
    pub fn new(provider: Arc<dyn SearchProvider>, media: Arc<MediaService>) -> Self {
        Self { provider, media }
    }

    fn build_query(context: &PipelineContext) -> Result<SearchQuery, StepError> {
        let title = context
            .lookup("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StepError::permanent("context has no title"))?;
        Ok(SearchQuery {
            title: title.to_string(),
            year: context.lookup("year").and_then(|v| v.as_i64()).map(|y| y as i32),
            season: context
                .lookup("item.season")
                .and_then(|v| v.as_i64())
                .map(|s| s as i32),
            episode: context
                .lookup("item.episode")
                .and_then(|v| v.as_i64())
                .map(|e| e as i32),
        })
    }
}

#[async_trait]
impl Step for SearchStep {
    fn validate_config(&self, config: &Map<String, Value>) -> Result<(), ConfigError> {
        if let Some(min) = config.get("min_seeders") {
            if !min.is_u64() {
                return Err(ConfigError("min_seeders must be a non-negative integer".to_string()));
            }
        }
        Ok(())
    }

    async fn execute(&self, context: &PipelineContext, config: &Map<String, Value>) -> StepOutcome {
        let item_id = match context_uuid(context, "item.id") {
            Ok(id) => id,
            Err(e) => return StepOutcome::Failed(e),
        };
        let query = match Self::build_query(context) {
            Ok(query) => query,
            Err(e) => return StepOutcome::Failed(e),
        };

        // Park the item in the searching state before the first query so
        // retry scheduling treats exhaustion as "keep looking".
        if let Err(e) = self.media.set_item_status(item_id, ItemStatus::Searching).await {
            return StepOutcome::Failed(StepError::retryable(format!(
                "could not update item {}: {}",
                item_id, e
            )));
        }

        let min_seeders = config
            .get("min_seeders")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        debug!("searching for {:?}", query);
        let releases = match self.provider.search(&query).await {
            Ok(releases) => releases,
            Err(e) => {
                return StepOutcome::Failed(StepError::for_service(
                    format!("search failed: {:#}", e),
                    self.provider.service_name(),
                ));
            }
        };

        let total = releases.len();
        let best = releases
            .into_iter()
            .filter(|r| r.seeders >= min_seeders)
            .max_by_key(|r| r.seeders);

        let Some(best) = best else {
            warn!(
                "no usable release for item {} ({} candidate(s) below threshold)",
                item_id, total
            );
            return StepOutcome::Failed(StepError::for_service(
                "no usable release in search results",
                self.provider.service_name(),
            ));
        };

        info!(
            "selected release for item {}: {} ({} seeders)",
            item_id, best.title, best.seeders
        );
        let mut output = Map::new();
        output.insert(
            "search".to_string(),
            json!({
                "results_count": total,
                "best": best,
            }),
        );
        StepOutcome::success(output)
    }
}
