//! In-memory repository implementations
//!
//! Used by engine, dispatcher, and queue tests so every test constructs an
//! isolated world with no database. Semantics mirror the Postgres
//! implementations, including NotFound behavior.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reel_core::domain::breaker::CircuitBreakerRecord;
use reel_core::domain::encoding::{AssignmentStatus, EncodingAssignment};
use reel_core::domain::execution::{
    ExecutionStatus, PipelineContext, PipelineExecution, StepExecution,
};
use reel_core::domain::media::{MediaItem, MediaRequest};
use reel_core::domain::template::PipelineTemplate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AssignmentRepository, BreakerRepository, ExecutionRepository, MediaRepository, RepoError,
    RepoResult, TemplateRepository,
};

#[derive(Default)]
pub struct MemoryExecutionRepository {
    executions: RwLock<HashMap<Uuid, PipelineExecution>>,
    steps: RwLock<Vec<StepExecution>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ExecutionRepository for MemoryExecutionRepository {
    async fn create(&self, execution: &PipelineExecution) -> RepoResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<PipelineExecution> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("execution {}", id)))
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> RepoResult<Vec<PipelineExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn save_progress(
        &self,
        id: Uuid,
        context: &PipelineContext,
        cursor: Option<usize>,
    ) -> RepoResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| RepoError::NotFound(format!("execution {}", id)))?;
        execution.context = context.clone();
        execution.cursor = cursor;
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> RepoResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| RepoError::NotFound(format!("execution {}", id)))?;
        execution.status = status;
        if let Some(error) = error {
            execution.error = Some(error.to_string());
        }
        if status.is_terminal() {
            execution.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_step(&self, record: &StepExecution) -> RepoResult<()> {
        self.steps.write().await.push(record.clone());
        Ok(())
    }

    async fn steps_for(&self, execution_id: Uuid) -> RepoResult<Vec<StepExecution>> {
        Ok(self
            .steps
            .read()
            .await
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMediaRepository {
    requests: RwLock<HashMap<Uuid, MediaRequest>>,
    items: RwLock<HashMap<Uuid, MediaItem>>,
}

impl MemoryMediaRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MediaRepository for MemoryMediaRepository {
    async fn create_request(&self, request: &MediaRequest, items: &[MediaItem]) -> RepoResult<()> {
        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        let mut map = self.items.write().await;
        for item in items {
            map.insert(item.id, item.clone());
        }
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> RepoResult<MediaRequest> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("request {}", id)))
    }

    async fn list_requests(&self) -> RepoResult<Vec<MediaRequest>> {
        Ok(self.requests.read().await.values().cloned().collect())
    }

    async fn items_for(&self, request_id: Uuid) -> RepoResult<Vec<MediaItem>> {
        let mut items: Vec<MediaItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|i| i.request_id == request_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.season, i.episode));
        Ok(items)
    }

    async fn get_item(&self, id: Uuid) -> RepoResult<MediaItem> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("item {}", id)))
    }

    async fn update_item(&self, item: &MediaItem) -> RepoResult<()> {
        let mut items = self.items.write().await;
        if !items.contains_key(&item.id) {
            return Err(RepoError::NotFound(format!("item {}", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBreakerRepository {
    records: RwLock<HashMap<String, CircuitBreakerRecord>>,
}

impl MemoryBreakerRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BreakerRepository for MemoryBreakerRepository {
    async fn load_all(&self) -> RepoResult<Vec<CircuitBreakerRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, record: &CircuitBreakerRecord) -> RepoResult<()> {
        self.records
            .write()
            .await
            .insert(record.service.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, service: &str) -> RepoResult<()> {
        self.records
            .write()
            .await
            .remove(service)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(format!("breaker {}", service)))
    }
}

#[derive(Default)]
pub struct MemoryAssignmentRepository {
    assignments: RwLock<HashMap<Uuid, EncodingAssignment>>,
}

impl MemoryAssignmentRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AssignmentRepository for MemoryAssignmentRepository {
    async fn create(&self, assignment: &EncodingAssignment) -> RepoResult<()> {
        self.assignments
            .write()
            .await
            .insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn update(&self, assignment: &EncodingAssignment) -> RepoResult<()> {
        let mut assignments = self.assignments.write().await;
        if !assignments.contains_key(&assignment.id) {
            return Err(RepoError::NotFound(format!("assignment {}", assignment.id)));
        }
        assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<EncodingAssignment> {
        self.assignments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("assignment {}", id)))
    }

    async fn list_active(&self) -> RepoResult<Vec<EncodingAssignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .values()
            .filter(|a| {
                matches!(
                    a.status,
                    AssignmentStatus::Pending | AssignmentStatus::Running
                )
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTemplateRepository {
    templates: RwLock<HashMap<Uuid, PipelineTemplate>>,
}

impl MemoryTemplateRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn save(&self, template: &PipelineTemplate) -> RepoResult<()> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> RepoResult<PipelineTemplate> {
        self.templates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(format!("template {}", id)))
    }

    async fn find_by_name(&self, name: &str) -> RepoResult<Option<PipelineTemplate>> {
        Ok(self
            .templates
            .read()
            .await
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn list(&self) -> RepoResult<Vec<PipelineTemplate>> {
        Ok(self.templates.read().await.values().cloned().collect())
    }
}
