//! Media request/item business logic
//!
//! Owns item status transitions and the capped error history. The
//! request-level status is always recomputed from item statuses on read,
//! so the item view and the request view can never drift apart.

use std::sync::Arc;

use chrono::Utc;
use reel_core::domain::media::{
    ErrorHistoryEntry, ItemStatus, MediaItem, MediaRequest, RequestStatus,
};
use reel_core::dto::api::{NewItem, RequestDetail, SubmitRequest};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::retry::classify;
use crate::repository::{MediaRepository, RepoResult};

pub struct MediaService {
    repository: Arc<dyn MediaRepository>,
}

impl MediaService {
    pub fn new(repository: Arc<dyn MediaRepository>) -> Self {
        Self { repository }
    }

    /// Create a request with its items. A request without explicit items
    /// gets a single movie-style item.
    pub async fn submit(&self, submit: SubmitRequest) -> RepoResult<MediaRequest> {
        let request = MediaRequest {
            id: Uuid::new_v4(),
            title: submit.title,
            tmdb_id: submit.tmdb_id,
            year: submit.year,
            requested_at: Utc::now(),
        };
        let specs: Vec<NewItem> = if submit.items.is_empty() {
            vec![NewItem {
                season: None,
                episode: None,
            }]
        } else {
            submit.items
        };
        let items: Vec<MediaItem> = specs
            .into_iter()
            .map(|spec| MediaItem {
                id: Uuid::new_v4(),
                request_id: request.id,
                season: spec.season,
                episode: spec.episode,
                status: ItemStatus::Wanted,
                attempts: 0,
                next_attempt_at: None,
                error_history: Vec::new(),
            })
            .collect();
        self.repository.create_request(&request, &items).await?;
        info!(
            "request {} submitted: {} ({} item(s))",
            request.id,
            request.title,
            items.len()
        );
        Ok(request)
    }

    /// Request with items and the derived aggregate status.
    pub async fn detail(&self, request_id: Uuid) -> RepoResult<RequestDetail> {
        let request = self.repository.get_request(request_id).await?;
        let items = self.repository.items_for(request_id).await?;
        let statuses: Vec<ItemStatus> = items.iter().map(|i| i.status).collect();
        Ok(RequestDetail {
            request,
            status: RequestStatus::from_items(&statuses),
            items,
        })
    }

    pub async fn list(&self) -> RepoResult<Vec<RequestDetail>> {
        let requests = self.repository.list_requests().await?;
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(self.detail(request.id).await?);
        }
        Ok(out)
    }

    pub async fn item(&self, item_id: Uuid) -> RepoResult<MediaItem> {
        self.repository.get_item(item_id).await
    }

    /// Move an item to a new status and report the recomputed request
    /// status.
    pub async fn set_item_status(
        &self,
        item_id: Uuid,
        status: ItemStatus,
    ) -> RepoResult<RequestStatus> {
        let mut item = self.repository.get_item(item_id).await?;
        if item.status == status {
            let detail = self.detail(item.request_id).await?;
            return Ok(detail.status);
        }
        debug!("item {} status {} -> {}", item_id, item.status, status);
        item.status = status;
        self.repository.update_item(&item).await?;
        let detail = self.detail(item.request_id).await?;
        debug!(
            "request {} aggregate status now {}",
            item.request_id, detail.status
        );
        Ok(detail.status)
    }

    /// Record a failed attempt against an item: classify the error, append
    /// it to the capped history, bump the attempt counter.
    pub async fn record_item_error(
        &self,
        item_id: Uuid,
        message: &str,
        next_attempt_at: Option<chrono::DateTime<Utc>>,
    ) -> RepoResult<()> {
        let mut item = self.repository.get_item(item_id).await?;
        item.attempts += 1;
        item.record_error(ErrorHistoryEntry {
            occurred_at: Utc::now(),
            message: message.to_string(),
            kind: classify(message).to_string(),
            attempt: item.attempts,
        });
        item.next_attempt_at = next_attempt_at;
        self.repository.update_item(&item).await
    }

    pub fn repository(&self) -> Arc<dyn MediaRepository> {
        Arc::clone(&self.repository)
    }
}
