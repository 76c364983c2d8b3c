//! Pipeline execution state
//!
//! One `PipelineExecution` exists per in-flight request. The executor owns
//! exclusive write access to its context and status; concurrent executions
//! never share one. The context plus the cursor are persisted after every
//! step so a restarted process resumes from the last completed node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::media::{MediaItem, MediaRequest};

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Paused => "Paused",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Context keys that step output can never overwrite.
pub const PROTECTED_FIELDS: &[&str] = &["request_id", "execution_id", "title", "tmdb_id", "year"];

/// The accumulating key/value record of step outputs for one execution
///
/// Top level holds the immutable request identity plus one object per step
/// category (`search`, `download`, ...). Step output merges with shallow
/// per-category key overwrite; identity fields silently win over any step
/// that tries to clobber them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineContext {
    inner: Map<String, Value>,
}

impl PipelineContext {
    /// Seed a context with request identity.
    pub fn for_request(request: &MediaRequest) -> Self {
        let mut inner = Map::new();
        inner.insert("request_id".to_string(), Value::String(request.id.to_string()));
        inner.insert("title".to_string(), Value::String(request.title.clone()));
        inner.insert("tmdb_id".to_string(), Value::from(request.tmdb_id));
        inner.insert(
            "year".to_string(),
            request.year.map(Value::from).unwrap_or(Value::Null),
        );
        Self { inner }
    }

    /// Seed a context with request identity plus the targeted item.
    ///
    /// The `item` key is a regular category: steps may enrich it, but its
    /// id is only advisory; the execution record owns the real item id.
    pub fn for_item(request: &MediaRequest, item: &MediaItem) -> Self {
        let mut ctx = Self::for_request(request);
        ctx.inner.insert(
            "item".to_string(),
            serde_json::json!({
                "id": item.id.to_string(),
                "season": item.season,
                "episode": item.episode,
            }),
        );
        ctx
    }

    pub fn from_map(inner: Map<String, Value>) -> Self {
        Self { inner }
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.inner.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Resolve a dot-separated path into the context.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let mut current = self.inner.get(head)?;
        if let Some(rest) = rest {
            for segment in rest.split('.') {
                current = match current {
                    Value::Object(map) => map.get(segment)?,
                    Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                    _ => return None,
                };
            }
        }
        Some(current)
    }

    /// Executor-owned write, bypassing the protection check.
    ///
    /// Only the executor calls this, to seed identity and bookkeeping
    /// fields; step output always goes through `merge_output`.
    pub fn insert_field(&mut self, key: impl Into<String>, value: Value) {
        self.inner.insert(key.into(), value);
    }

    /// Merge a step's output into the context.
    ///
    /// Each top-level output key is a category; object values shallow-merge
    /// into the existing category object, anything else replaces it.
    /// Returns the names of protected identity fields the output attempted
    /// to overwrite (dropped, for the caller to log).
    pub fn merge_output(&mut self, output: Map<String, Value>) -> Vec<String> {
        let mut rejected = Vec::new();
        for (key, value) in output {
            if PROTECTED_FIELDS.contains(&key.as_str()) {
                rejected.push(key);
                continue;
            }
            match (self.inner.get_mut(&key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k, v);
                    }
                }
                (_, value) => {
                    self.inner.insert(key, value);
                }
            }
        }
        rejected
    }
}

/// One in-flight (or finished) pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    pub request_id: Uuid,
    /// The acquirable item this run is working on.
    pub item_id: Uuid,
    pub template_id: Uuid,
    pub status: ExecutionStatus,
    pub context: PipelineContext,
    /// Pre-order index of the last completed node; resume continues after it.
    pub cursor: Option<usize>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    pub fn new(request: &MediaRequest, item: &MediaItem, template_id: Uuid) -> Self {
        let id = Uuid::new_v4();
        let mut context = PipelineContext::for_item(request, item);
        context.insert_field("execution_id", Value::String(id.to_string()));
        Self {
            id,
            request_id: request.id,
            item_id: item.id,
            template_id,
            status: ExecutionStatus::Running,
            context,
            cursor: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Outcome recorded for one executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcomeKind {
    Completed,
    Failed,
    Skipped,
    TimedOut,
    Paused,
}

impl std::fmt::Display for StepOutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepOutcomeKind::Completed => "Completed",
            StepOutcomeKind::Failed => "Failed",
            StepOutcomeKind::Skipped => "Skipped",
            StepOutcomeKind::TimedOut => "TimedOut",
            StepOutcomeKind::Paused => "Paused",
        };
        write!(f, "{}", s)
    }
}

/// Observability record for one step of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_name: String,
    /// Position in the template's pre-order walk.
    pub position: usize,
    pub outcome: StepOutcomeKind,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> MediaRequest {
        MediaRequest {
            id: Uuid::new_v4(),
            title: "Severance".to_string(),
            tmdb_id: 95396,
            year: Some(2022),
            requested_at: Utc::now(),
        }
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_identity_seeded() {
        let req = request();
        let ctx = PipelineContext::for_request(&req);
        assert_eq!(ctx.get("title"), Some(&json!("Severance")));
        assert_eq!(ctx.get("tmdb_id"), Some(&json!(95396)));
    }

    #[test]
    fn test_merge_creates_category() {
        let mut ctx = PipelineContext::for_request(&request());
        let rejected = ctx.merge_output(obj(json!({ "search": { "results_count": 3 } })));
        assert!(rejected.is_empty());
        assert_eq!(ctx.get("search"), Some(&json!({ "results_count": 3 })));
    }

    #[test]
    fn test_merge_shallow_overwrites_category_keys() {
        let mut ctx = PipelineContext::for_request(&request());
        ctx.merge_output(obj(json!({ "search": { "results_count": 3, "indexer": "nyx" } })));
        ctx.merge_output(obj(json!({ "search": { "results_count": 5 } })));
        assert_eq!(
            ctx.get("search"),
            Some(&json!({ "results_count": 5, "indexer": "nyx" }))
        );
    }

    #[test]
    fn test_protected_fields_never_overwritten() {
        let req = request();
        let mut ctx = PipelineContext::for_request(&req);
        let rejected = ctx.merge_output(obj(json!({
            "title": "Hijacked",
            "tmdb_id": 0,
            "download": { "completed": true }
        })));
        assert_eq!(rejected.len(), 2);
        assert_eq!(ctx.get("title"), Some(&json!("Severance")));
        assert_eq!(ctx.get("tmdb_id"), Some(&json!(95396)));
        assert_eq!(ctx.get("download"), Some(&json!({ "completed": true })));
    }

    #[test]
    fn test_non_object_category_replaced() {
        let mut ctx = PipelineContext::default();
        ctx.merge_output(obj(json!({ "download": "starting" })));
        ctx.merge_output(obj(json!({ "download": { "progress": 10 } })));
        assert_eq!(ctx.get("download"), Some(&json!({ "progress": 10 })));
    }
}
