//! Delivery domain types
//!
//! A delivery job ships one finished artifact to one or more storage
//! targets. Targets are tried sequentially within a job; the job counts as
//! successful when at least one target accepted the artifact.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A remote (or mounted) storage destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    /// Target label, e.g. "nas-main".
    pub name: String,
    /// Root directory artifacts are placed under.
    pub root: String,
    /// Layout profile within the target, e.g. "plex" or "flat".
    pub profile: String,
}

/// One finish-and-ship job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub item_id: Uuid,
    pub request_id: Uuid,
    pub source_path: String,
    pub targets: Vec<DeliveryTarget>,
}

/// Result of shipping to one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: String,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Collected outcome of one delivery job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub item_id: Uuid,
    pub results: Vec<TargetResult>,
}

impl DeliveryOutcome {
    /// A job succeeds when at least one target accepted the artifact.
    pub fn succeeded(&self) -> bool {
        self.results.iter().any(|r| r.ok)
    }
}
