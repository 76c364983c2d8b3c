//! Pipeline executor
//!
//! Walks the compiled step arena for one execution at a time. Each walk is
//! one tokio task; many walks run concurrently and never share state. The
//! walk persists context and cursor after every node, so a restarted
//! process picks up from the last completed node instead of the top.
//!
//! Step failures never unwind past this module. They go through the retry
//! strategy, and whatever survives it lands in the execution's status and
//! error column where operators can see it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use reel_core::domain::execution::{
    ExecutionStatus, PipelineExecution, StepExecution, StepOutcomeKind,
};
use reel_core::domain::media::ItemStatus;
use reel_core::domain::template::PipelineTemplate;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::StepRegistry;
use super::retry::{RetryDecision, RetryStrategy};
use super::step::{NextDirective, StepError, StepOutcome};
use super::EngineError;
use crate::dispatch::EncoderDispatcher;
use crate::repository::{ExecutionRepository, TemplateRepository};
use crate::service::MediaService;

pub struct PipelineEngine {
    registry: Arc<StepRegistry>,
    retry: Arc<RetryStrategy>,
    executions: Arc<dyn ExecutionRepository>,
    templates: Arc<dyn TemplateRepository>,
    media: Arc<MediaService>,
    dispatcher: Arc<EncoderDispatcher>,
    /// Cancellation flags for walks currently running in this process.
    cancels: RwLock<HashMap<Uuid, watch::Sender<bool>>>,
    /// Handle to the owning Arc, for spawning walk tasks from `&self`.
    self_ref: Weak<Self>,
}

impl PipelineEngine {
    pub fn new(
        registry: Arc<StepRegistry>,
        retry: Arc<RetryStrategy>,
        executions: Arc<dyn ExecutionRepository>,
        templates: Arc<dyn TemplateRepository>,
        media: Arc<MediaService>,
        dispatcher: Arc<EncoderDispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            retry,
            executions,
            templates,
            media,
            dispatcher,
            cancels: RwLock::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Create executions for every unfinished item of a request.
    ///
    /// The template is checked against the registry here, so an
    /// unregistered step kind or malformed step config fails the start call
    /// instead of surfacing mid-walk.
    pub async fn begin(
        &self,
        request_id: Uuid,
        template_id: Uuid,
    ) -> Result<Vec<PipelineExecution>, EngineError> {
        let template = self.templates.get(template_id).await?;
        self.registry.check_template(&template)?;

        let request = self.media.repository().get_request(request_id).await?;
        let items = self.media.repository().items_for(request_id).await?;

        let mut out = Vec::new();
        for item in items {
            if item.status == ItemStatus::Available {
                continue;
            }
            let execution = PipelineExecution::new(&request, &item, template_id);
            self.executions.create(&execution).await?;
            info!(
                "execution {} created for item {} (template {})",
                execution.id, item.id, template.name
            );
            out.push(execution);
        }
        Ok(out)
    }

    /// Start walking: one spawned task per unfinished item of the request.
    pub async fn start(
        &self,
        request_id: Uuid,
        template_id: Uuid,
    ) -> Result<Vec<Uuid>, EngineError> {
        let executions = self.begin(request_id, template_id).await?;
        let ids = executions.iter().map(|e| e.id).collect();
        for execution in &executions {
            self.spawn_walk(execution.id);
        }
        Ok(ids)
    }

    /// Cancel an execution.
    ///
    /// Observable at the next step boundary of a live walk; an execution
    /// without a live walk (paused, or left over from a previous process)
    /// is marked Cancelled directly. In-flight transcode assignments get an
    /// explicit cancel message rather than being abandoned.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        self.dispatcher
            .cancel_for_execution(execution_id, "execution cancelled")
            .await;

        let signalled = self
            .cancels
            .read()
            .await
            .get(&execution_id)
            .map(|tx| tx.send(true).is_ok());
        if signalled == Some(true) {
            info!("execution {} cancel requested", execution_id);
            return Ok(());
        }

        let execution = self.executions.get(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: execution_id,
                status: execution.status,
                action: "cancel",
            });
        }
        self.executions
            .set_status(execution_id, ExecutionStatus::Cancelled, None)
            .await?;
        info!("execution {} cancelled", execution_id);
        Ok(())
    }

    /// Resume a paused execution from its persisted cursor.
    ///
    /// The paused step did not complete, so the walk re-enters at that step
    /// and runs it again.
    pub async fn resume(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let execution = self.executions.get(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            return Err(EngineError::InvalidState {
                id: execution_id,
                status: execution.status,
                action: "resume",
            });
        }
        self.executions
            .set_status(execution_id, ExecutionStatus::Running, None)
            .await?;
        info!(
            "execution {} resuming from cursor {:?}",
            execution_id, execution.cursor
        );
        self.spawn_walk(execution_id);
        Ok(())
    }

    /// Pick up executions a previous process left Running.
    ///
    /// Called once at startup; each recovered execution continues from its
    /// persisted cursor.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let running = self
            .executions
            .list_by_status(ExecutionStatus::Running)
            .await?;
        let count = running.len();
        for execution in running {
            info!(
                "recovering execution {} from cursor {:?}",
                execution.id, execution.cursor
            );
            self.spawn_walk(execution.id);
        }
        Ok(count)
    }

    fn spawn_walk(&self, execution_id: Uuid) {
        let Some(engine) = self.self_ref.upgrade() else {
            // The engine is being torn down; nothing to drive the walk.
            return;
        };
        tokio::spawn(async move {
            match engine.drive(execution_id).await {
                Ok(status) => debug!("execution {} finished {}", execution_id, status),
                Err(e) => {
                    error!("execution {} aborted: {}", execution_id, e);
                    if let Err(e) = engine
                        .executions
                        .set_status(execution_id, ExecutionStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        error!("could not mark execution {} failed: {}", execution_id, e);
                    }
                }
            }
        });
    }

    /// Run one execution's walk to its next resting state.
    pub async fn drive(&self, execution_id: Uuid) -> Result<ExecutionStatus, EngineError> {
        let execution = self.executions.get(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidState {
                id: execution_id,
                status: execution.status,
                action: "drive",
            });
        }
        let template = self.templates.get(execution.template_id).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.write().await.insert(execution_id, cancel_tx);
        let result = self.walk(execution, &template, cancel_rx).await;
        self.cancels.write().await.remove(&execution_id);
        result
    }

    async fn walk(
        &self,
        mut execution: PipelineExecution,
        template: &PipelineTemplate,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionStatus, EngineError> {
        let order = template.preorder();
        // The cursor is the last completed position; the walk continues
        // after it. A fresh execution starts at the top.
        let mut pos = execution.cursor.map(|c| c + 1).unwrap_or(0);

        while pos < order.len() {
            if *cancel.borrow() {
                return self.mark_cancelled(&execution).await;
            }

            let node_idx = order[pos];
            let node = &template.nodes[node_idx];
            let subtree_len = template.subtree(node_idx).len();

            if let Some(condition) = &node.spec.condition {
                if !condition.evaluate(&execution.context.as_value()) {
                    debug!(
                        "condition false for step {}, skipping {} node(s)",
                        node.spec.name, subtree_len
                    );
                    pos += subtree_len;
                    execution.cursor = Some(pos - 1);
                    self.executions
                        .save_progress(execution.id, &execution.context, execution.cursor)
                        .await?;
                    continue;
                }
            }

            // Templates are checked at start; a hole here means the
            // registry changed underneath a stored template.
            let Some(step) = self.registry.get(node.spec.kind) else {
                return self
                    .mark_failed(
                        &execution,
                        &format!(
                            "no step implementation registered for kind {}",
                            node.spec.kind
                        ),
                    )
                    .await;
            };

            debug!("executing step {} (position {})", node.spec.name, pos);
            let started_at = Utc::now();
            let mut failed_service: Option<String> = None;
            let mut timed_out;

            let outcome = loop {
                timed_out = false;
                let attempt = step.execute(&execution.context, &node.spec.config);
                let result = match node.spec.timeout_secs {
                    Some(secs) => {
                        match tokio::time::timeout(StdDuration::from_secs(secs), attempt).await {
                            Ok(result) => result,
                            Err(_) => {
                                timed_out = true;
                                StepOutcome::Failed(StepError::retryable(format!(
                                    "step {} timed out after {}s",
                                    node.spec.name, secs
                                )))
                            }
                        }
                    }
                    None => attempt.await,
                };

                let error = match result {
                    StepOutcome::Failed(error) => error,
                    other => {
                        if let Some(service) = failed_service.take() {
                            // The service came back within this walk; let a
                            // half-open breaker count the success.
                            self.retry.note_success(&service).await;
                        }
                        break other;
                    }
                };
                failed_service = error.service.clone().or(failed_service);

                if !node.spec.retryable {
                    self.media
                        .record_item_error(execution.item_id, &error.message, None)
                        .await?;
                    break StepOutcome::Failed(error);
                }

                let item = self.media.item(execution.item_id).await?;
                match self.retry.decide(item.status, item.attempts, &error).await {
                    RetryDecision::Retry { at, reason } => {
                        warn!(
                            "step {} failed ({}), retrying: {}",
                            node.spec.name, error.message, reason
                        );
                        self.media
                            .record_item_error(execution.item_id, &error.message, Some(at))
                            .await?;
                        if !self.wait_until(at, &mut cancel).await {
                            return self.mark_cancelled(&execution).await;
                        }
                    }
                    RetryDecision::Defer { until, reason } => {
                        // skip-until: wait out the breaker without spending
                        // an attempt.
                        warn!("step {} deferred until {}: {}", node.spec.name, until, reason);
                        if !self.wait_until(until, &mut cancel).await {
                            return self.mark_cancelled(&execution).await;
                        }
                    }
                    RetryDecision::GiveUp { reason } => {
                        self.media
                            .record_item_error(execution.item_id, &error.message, None)
                            .await?;
                        break StepOutcome::Failed(StepError {
                            message: format!("{} ({})", error.message, reason),
                            ..error
                        });
                    }
                }
            };

            match outcome {
                StepOutcome::Success { output, next } => {
                    let rejected = execution.context.merge_output(output);
                    if !rejected.is_empty() {
                        warn!(
                            "step {} tried to overwrite identity field(s) {:?}, dropped",
                            node.spec.name, rejected
                        );
                    }
                    self.executions
                        .append_step(&step_record(
                            &execution,
                            &node.spec.name,
                            pos,
                            StepOutcomeKind::Completed,
                            None,
                            started_at,
                        ))
                        .await?;

                    match next {
                        NextDirective::Continue => {
                            execution.cursor = Some(pos);
                            pos += 1;
                        }
                        NextDirective::Halt => {
                            execution.cursor = Some(pos);
                            self.executions
                                .save_progress(execution.id, &execution.context, execution.cursor)
                                .await?;
                            self.executions
                                .set_status(execution.id, ExecutionStatus::Completed, None)
                                .await?;
                            info!(
                                "execution {} halted by step {} and completed",
                                execution.id, node.spec.name
                            );
                            return Ok(ExecutionStatus::Completed);
                        }
                        NextDirective::Goto(target) => {
                            let landing = order
                                .iter()
                                .position(|&idx| template.nodes[idx].spec.name == target);
                            match landing {
                                // Forward-only: the target must lie past
                                // the emitter's own subtree.
                                Some(landing) if landing >= pos + subtree_len => {
                                    execution.cursor = Some(landing - 1);
                                    pos = landing;
                                }
                                _ => {
                                    return self
                                        .mark_failed(
                                            &execution,
                                            &format!(
                                                "step {} directed the walk to {:?}, which is not a later step",
                                                node.spec.name, target
                                            ),
                                        )
                                        .await;
                                }
                            }
                        }
                    }
                }
                StepOutcome::Skipped { reason } => {
                    debug!(
                        "step {} skipped{}",
                        node.spec.name,
                        reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
                    );
                    self.executions
                        .append_step(&step_record(
                            &execution,
                            &node.spec.name,
                            pos,
                            StepOutcomeKind::Skipped,
                            reason,
                            started_at,
                        ))
                        .await?;
                    execution.cursor = Some(pos);
                    pos += 1;
                }
                StepOutcome::Failed(error) => {
                    let kind = if timed_out {
                        StepOutcomeKind::TimedOut
                    } else {
                        StepOutcomeKind::Failed
                    };
                    self.executions
                        .append_step(&step_record(
                            &execution,
                            &node.spec.name,
                            pos,
                            kind,
                            Some(error.message.clone()),
                            started_at,
                        ))
                        .await?;

                    if node.spec.continue_on_error || !node.spec.required {
                        warn!(
                            "step {} failed ({}), continuing with next sibling",
                            node.spec.name, error.message
                        );
                        pos += subtree_len;
                        execution.cursor = Some(pos - 1);
                    } else {
                        return self.mark_failed(&execution, &error.message).await;
                    }
                }
                StepOutcome::Paused { reason } => {
                    self.executions
                        .append_step(&step_record(
                            &execution,
                            &node.spec.name,
                            pos,
                            StepOutcomeKind::Paused,
                            Some(reason.clone()),
                            started_at,
                        ))
                        .await?;
                    // The paused step did not complete; the cursor stays
                    // put so resume re-runs it.
                    self.executions
                        .save_progress(execution.id, &execution.context, execution.cursor)
                        .await?;
                    self.executions
                        .set_status(execution.id, ExecutionStatus::Paused, Some(&reason))
                        .await?;
                    info!(
                        "execution {} paused at step {}: {}",
                        execution.id, node.spec.name, reason
                    );
                    return Ok(ExecutionStatus::Paused);
                }
            }

            self.executions
                .save_progress(execution.id, &execution.context, execution.cursor)
                .await?;
        }

        self.executions
            .set_status(execution.id, ExecutionStatus::Completed, None)
            .await?;
        info!("execution {} completed", execution.id);
        Ok(ExecutionStatus::Completed)
    }

    /// Sleep until `at`, or return false if the walk was cancelled.
    async fn wait_until(&self, at: DateTime<Utc>, cancel: &mut watch::Receiver<bool>) -> bool {
        let delay = (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.changed() => false,
        }
    }

    async fn mark_failed(
        &self,
        execution: &PipelineExecution,
        message: &str,
    ) -> Result<ExecutionStatus, EngineError> {
        if let Err(e) = self
            .media
            .set_item_status(execution.item_id, ItemStatus::Failed)
            .await
        {
            warn!("could not mark item {} failed: {}", execution.item_id, e);
        }
        self.executions
            .set_status(execution.id, ExecutionStatus::Failed, Some(message))
            .await?;
        error!("execution {} failed: {}", execution.id, message);
        Ok(ExecutionStatus::Failed)
    }

    async fn mark_cancelled(
        &self,
        execution: &PipelineExecution,
    ) -> Result<ExecutionStatus, EngineError> {
        self.executions
            .set_status(execution.id, ExecutionStatus::Cancelled, None)
            .await?;
        info!("execution {} cancelled", execution.id);
        Ok(ExecutionStatus::Cancelled)
    }
}

fn step_record(
    execution: &PipelineExecution,
    step_name: &str,
    position: usize,
    outcome: StepOutcomeKind,
    error: Option<String>,
    started_at: DateTime<Utc>,
) -> StepExecution {
    StepExecution {
        id: Uuid::new_v4(),
        execution_id: execution.id,
        step_name: step_name.to_string(),
        position,
        outcome,
        error,
        started_at,
        finished_at: Utc::now(),
    }
}
