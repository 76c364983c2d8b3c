//! Media request and item domain types
//!
//! A request is the user-facing unit ("get me this show"); items are the
//! individually acquirable files under it (episodes, or a single movie file).
//! The request-level status is always derived from item statuses, never
//! stored on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum retained error history entries per item.
pub const ERROR_HISTORY_CAP: usize = 10;

/// A media acquisition request
///
/// Identity fields (title, tmdb_id, year) are immutable for the lifetime of
/// the request and are mirrored into every execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRequest {
    pub id: Uuid,
    pub title: String,
    pub tmdb_id: i64,
    pub year: Option<i32>,
    pub requested_at: DateTime<Utc>,
}

/// One acquirable unit under a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Uuid,
    pub request_id: Uuid,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub status: ItemStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_history: Vec<ErrorHistoryEntry>,
}

impl MediaItem {
    /// Append a failure to the capped error history, dropping the oldest
    /// entry beyond the cap.
    pub fn record_error(&mut self, entry: ErrorHistoryEntry) {
        self.error_history.push(entry);
        if self.error_history.len() > ERROR_HISTORY_CAP {
            let excess = self.error_history.len() - ERROR_HISTORY_CAP;
            self.error_history.drain(..excess);
        }
    }
}

/// Lifecycle status of a media item
///
/// `Searching` is long-lived: an item stuck in search keeps retrying on a
/// fixed interval no matter how its searches fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Wanted,
    Searching,
    Downloading,
    Encoding,
    Delivering,
    Available,
    Failed,
}

impl ItemStatus {
    /// Whether the item is still moving through the pipeline.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ItemStatus::Searching
                | ItemStatus::Downloading
                | ItemStatus::Encoding
                | ItemStatus::Delivering
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Wanted => "Wanted",
            ItemStatus::Searching => "Searching",
            ItemStatus::Downloading => "Downloading",
            ItemStatus::Encoding => "Encoding",
            ItemStatus::Delivering => "Delivering",
            ItemStatus::Available => "Available",
            ItemStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Derived request-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// No item has started yet
    Pending,
    /// At least one item is in flight
    Active,
    /// Every item is available
    Completed,
    /// Some items available, the rest failed
    PartiallyAvailable,
    /// Every item failed
    Failed,
}

impl RequestStatus {
    /// Compute the aggregate status from item statuses.
    ///
    /// A request with no items is Pending: there is nothing to acquire yet.
    pub fn from_items(items: &[ItemStatus]) -> Self {
        if items.is_empty() {
            return RequestStatus::Pending;
        }
        if items.iter().any(|s| s.is_active()) {
            return RequestStatus::Active;
        }
        let available = items.iter().filter(|s| **s == ItemStatus::Available).count();
        let failed = items.iter().filter(|s| **s == ItemStatus::Failed).count();
        if available == items.len() {
            RequestStatus::Completed
        } else if available > 0 && available + failed == items.len() {
            RequestStatus::PartiallyAvailable
        } else if failed == items.len() {
            RequestStatus::Failed
        } else {
            // Remaining items are Wanted and nothing is running.
            RequestStatus::Pending
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Active => "Active",
            RequestStatus::Completed => "Completed",
            RequestStatus::PartiallyAvailable => "PartiallyAvailable",
            RequestStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// One recorded failure against an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub occurred_at: DateTime<Utc>,
    pub message: String,
    pub kind: String,
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u32) -> ErrorHistoryEntry {
        ErrorHistoryEntry {
            occurred_at: Utc::now(),
            message: format!("error {}", n),
            kind: "transient".to_string(),
            attempt: n,
        }
    }

    fn item() -> MediaItem {
        MediaItem {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            season: Some(1),
            episode: Some(1),
            status: ItemStatus::Wanted,
            attempts: 0,
            next_attempt_at: None,
            error_history: Vec::new(),
        }
    }

    #[test]
    fn test_error_history_capped() {
        let mut item = item();
        for n in 0..15 {
            item.record_error(entry(n));
        }
        assert_eq!(item.error_history.len(), ERROR_HISTORY_CAP);
        // Oldest entries were dropped
        assert_eq!(item.error_history[0].attempt, 5);
        assert_eq!(item.error_history.last().unwrap().attempt, 14);
    }

    #[test]
    fn test_request_status_completed() {
        let statuses = vec![ItemStatus::Available, ItemStatus::Available];
        assert_eq!(RequestStatus::from_items(&statuses), RequestStatus::Completed);
    }

    #[test]
    fn test_request_status_active_wins() {
        let statuses = vec![ItemStatus::Available, ItemStatus::Encoding, ItemStatus::Failed];
        assert_eq!(RequestStatus::from_items(&statuses), RequestStatus::Active);
    }

    #[test]
    fn test_request_status_partial() {
        let statuses = vec![ItemStatus::Available, ItemStatus::Failed];
        assert_eq!(
            RequestStatus::from_items(&statuses),
            RequestStatus::PartiallyAvailable
        );
    }

    #[test]
    fn test_request_status_all_failed() {
        let statuses = vec![ItemStatus::Failed, ItemStatus::Failed];
        assert_eq!(RequestStatus::from_items(&statuses), RequestStatus::Failed);
    }

    #[test]
    fn test_request_status_empty_is_pending() {
        assert_eq!(RequestStatus::from_items(&[]), RequestStatus::Pending);
    }
}
