//! Encoding assignment domain types
//!
//! An assignment is one transcode job handed to one encoder. Terminal once
//! Completed or Failed; an assignment whose encoder disconnects mid-job is
//! failed explicitly, never left Running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Requested output characteristics for a transcode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeProfile {
    /// Profile label, e.g. "hevc-2160p" or "h264-1080p".
    pub name: String,
    pub video_codec: String,
    pub audio_codec: String,
    /// Constant rate factor; lower is higher quality.
    pub crf: u8,
    pub max_height: Option<u32>,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            name: "hevc-1080p".to_string(),
            video_codec: "libx265".to_string(),
            audio_codec: "aac".to_string(),
            crf: 22,
            max_height: Some(1080),
        }
    }
}

/// Status of a dispatched transcode job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssignmentStatus::Pending => "Pending",
            AssignmentStatus::Running => "Running",
            AssignmentStatus::Completed => "Completed",
            AssignmentStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// One transcode job dispatched to an encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingAssignment {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub encoder_id: String,
    pub status: AssignmentStatus,
    pub source_path: String,
    pub profile: TranscodeProfile,
    pub progress_percent: f32,
    pub output_path: Option<String>,
    pub output_size: Option<u64>,
    pub error: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EncodingAssignment {
    pub fn new(
        execution_id: Uuid,
        encoder_id: impl Into<String>,
        source_path: impl Into<String>,
        profile: TranscodeProfile,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            encoder_id: encoder_id.into(),
            status: AssignmentStatus::Pending,
            source_path: source_path.into(),
            profile,
            progress_percent: 0.0,
            output_path: None,
            output_size: None,
            error: None,
            assigned_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Snapshot of one connected encoder, as reported by the fleet API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSnapshot {
    pub encoder_id: String,
    pub capacity: usize,
    pub in_flight: usize,
    pub last_heartbeat_secs_ago: u64,
}
