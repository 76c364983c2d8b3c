//! API request/response types
//!
//! Domain types serve as responses where they fit; these are the request
//! bodies and the composed views the API returns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{PipelineExecution, StepExecution};
use crate::domain::media::{MediaItem, MediaRequest, RequestStatus};

/// Request body: submit a new media request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub title: String,
    pub tmdb_id: i64,
    pub year: Option<i32>,
    #[serde(default)]
    pub items: Vec<NewItem>,
}

/// One item under a submitted request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// Request body: start an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExecution {
    pub request_id: Uuid,
    pub template_id: Uuid,
}

/// Response body: executions spawned by a start call, one per item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExecutionResponse {
    pub execution_ids: Vec<Uuid>,
}

/// Composed view of a request with its derived status and items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request: MediaRequest,
    pub status: RequestStatus,
    pub items: Vec<MediaItem>,
}

/// Composed view of an execution with its step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub execution: PipelineExecution,
    pub steps: Vec<StepExecution>,
}
