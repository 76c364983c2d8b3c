//! Encoder pool and job routing
//!
//! Tracks every connected encoder's declared capacity, in-flight jobs, and
//! heartbeat. Assignment is capacity-aware: a job never queues on an
//! encoder. With no free slot anywhere, dispatch fails immediately and the
//! caller goes through the ordinary retry machinery.
//!
//! Disconnects (socket close or stale heartbeat) explicitly fail every job
//! the encoder still held; nothing is ever left silently Running.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reel_core::domain::encoding::{
    AssignmentStatus, EncoderSnapshot, EncodingAssignment, TranscodeProfile,
};
use reel_core::protocol::ServerMessage;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::AssignmentRepository;

/// Terminal result of one dispatched job
#[derive(Debug, Clone)]
pub enum AssignmentResult {
    Completed {
        output_path: String,
        output_size: u64,
    },
    Failed {
        error: String,
    },
}

/// Handle returned to the caller of `dispatch`
pub struct DispatchHandle {
    pub assignment_id: Uuid,
    pub encoder_id: String,
    /// Resolves exactly once, when the job reaches a terminal state.
    pub completion: oneshot::Receiver<AssignmentResult>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no encoders connected")]
    NoEncoders,
    #[error("all encoders at capacity")]
    NoCapacity,
    #[error("encoder {0} vanished during assignment")]
    EncoderGone(String),
    #[error("storage error: {0}")]
    Storage(String),
}

struct EncoderHandle {
    capacity: usize,
    in_flight: HashSet<Uuid>,
    last_heartbeat: Instant,
    tx: mpsc::Sender<ServerMessage>,
}

struct PendingJob {
    execution_id: Uuid,
    encoder_id: String,
    waiter: Option<oneshot::Sender<AssignmentResult>>,
}

pub struct EncoderDispatcher {
    encoders: RwLock<HashMap<String, EncoderHandle>>,
    pending: Mutex<HashMap<Uuid, PendingJob>>,
    assignments: Arc<dyn AssignmentRepository>,
    heartbeat_timeout: Duration,
}

impl EncoderDispatcher {
    pub fn new(assignments: Arc<dyn AssignmentRepository>, heartbeat_timeout: Duration) -> Self {
        Self {
            encoders: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            assignments,
            heartbeat_timeout,
        }
    }

    /// Register an encoder after a valid handshake.
    ///
    /// A reconnect under the same id supersedes the old connection; jobs
    /// the old connection still held are failed like any disconnect.
    pub async fn register(
        &self,
        encoder_id: &str,
        capacity: usize,
        tx: mpsc::Sender<ServerMessage>,
    ) {
        let previous = {
            let mut encoders = self.encoders.write().await;
            encoders.insert(
                encoder_id.to_string(),
                EncoderHandle {
                    capacity,
                    in_flight: HashSet::new(),
                    last_heartbeat: Instant::now(),
                    tx,
                },
            )
        };
        if let Some(previous) = previous {
            warn!(
                "encoder {} re-registered, superseding old connection",
                encoder_id
            );
            self.fail_jobs(
                previous.in_flight.iter().copied().collect(),
                "encoder connection superseded",
            )
            .await;
        }
        info!("encoder {} registered with capacity {}", encoder_id, capacity);
    }

    /// Remove an encoder and orphan-fail everything it held.
    pub async fn deregister(&self, encoder_id: &str, reason: &str) {
        let removed = self.encoders.write().await.remove(encoder_id);
        if let Some(handle) = removed {
            info!(
                "encoder {} deregistered ({}), {} job(s) in flight",
                encoder_id,
                reason,
                handle.in_flight.len()
            );
            self.fail_jobs(
                handle.in_flight.iter().copied().collect(),
                &format!("encoder {} disconnected: {}", encoder_id, reason),
            )
            .await;
        }
    }

    pub async fn heartbeat(&self, encoder_id: &str) {
        let mut encoders = self.encoders.write().await;
        if let Some(handle) = encoders.get_mut(encoder_id) {
            handle.last_heartbeat = Instant::now();
        } else {
            warn!("heartbeat from unregistered encoder {}", encoder_id);
        }
    }

    /// Encoders whose heartbeat exceeded the liveness timeout are treated
    /// exactly like disconnects. Called periodically by the reaper task.
    pub async fn reap_stale(&self) -> usize {
        let stale: Vec<String> = {
            let encoders = self.encoders.read().await;
            encoders
                .iter()
                .filter(|(_, h)| h.last_heartbeat.elapsed() > self.heartbeat_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for encoder_id in &stale {
            self.deregister(encoder_id, "heartbeat timeout").await;
        }
        stale.len()
    }

    /// Hand a transcode job to the least-loaded encoder with a free slot.
    pub async fn dispatch(
        &self,
        execution_id: Uuid,
        source_path: &str,
        profile: TranscodeProfile,
    ) -> Result<DispatchHandle, DispatchError> {
        // Pick a target and reserve the slot under one write lock so two
        // concurrent dispatches cannot both take an encoder's last slot.
        let (encoder_id, tx, assignment) = {
            let mut encoders = self.encoders.write().await;
            if encoders.is_empty() {
                return Err(DispatchError::NoEncoders);
            }
            let target = encoders
                .iter_mut()
                .filter(|(_, h)| h.in_flight.len() < h.capacity)
                .min_by_key(|(_, h)| h.in_flight.len())
                .map(|(id, h)| (id.clone(), h));
            let Some((encoder_id, handle)) = target else {
                return Err(DispatchError::NoCapacity);
            };
            let assignment = EncodingAssignment::new(
                execution_id,
                encoder_id.clone(),
                source_path,
                profile,
            );
            handle.in_flight.insert(assignment.id);
            (encoder_id, handle.tx.clone(), assignment)
        };

        self.assignments
            .create(&assignment)
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?;

        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.lock().await.insert(
            assignment.id,
            PendingJob {
                execution_id,
                encoder_id: encoder_id.clone(),
                waiter: Some(waiter_tx),
            },
        );

        let message = ServerMessage::JobAssign {
            assignment: assignment.clone(),
        };
        if tx.send(message).await.is_err() {
            // Connection died between selection and send; undo and report.
            self.release_job(&encoder_id, assignment.id).await;
            self.pending.lock().await.remove(&assignment.id);
            self.mark_failed(assignment.id, "encoder vanished before assignment was sent")
                .await;
            return Err(DispatchError::EncoderGone(encoder_id));
        }

        let mut running = assignment.clone();
        running.status = AssignmentStatus::Running;
        if let Err(e) = self.assignments.update(&running).await {
            warn!("failed to persist running assignment {}: {}", running.id, e);
        }
        debug!(
            "assignment {} dispatched to encoder {}",
            assignment.id, encoder_id
        );

        Ok(DispatchHandle {
            assignment_id: assignment.id,
            encoder_id,
            completion: waiter_rx,
        })
    }

    pub async fn handle_progress(&self, job_id: Uuid, percent: f32) {
        if let Ok(mut assignment) = self.assignments.get(job_id).await {
            assignment.progress_percent = percent.clamp(0.0, 100.0);
            if let Err(e) = self.assignments.update(&assignment).await {
                warn!("failed to persist progress for {}: {}", job_id, e);
            }
        } else {
            debug!("progress for unknown job {}", job_id);
        }
    }

    pub async fn handle_completed(&self, job_id: Uuid, output_path: String, output_size: u64) {
        let pending = self.pending.lock().await.remove(&job_id);
        let Some(mut pending) = pending else {
            debug!("completion for unknown or already-resolved job {}", job_id);
            return;
        };
        self.release_job(&pending.encoder_id, job_id).await;

        if let Ok(mut assignment) = self.assignments.get(job_id).await {
            assignment.status = AssignmentStatus::Completed;
            assignment.progress_percent = 100.0;
            assignment.output_path = Some(output_path.clone());
            assignment.output_size = Some(output_size);
            assignment.finished_at = Some(Utc::now());
            if let Err(e) = self.assignments.update(&assignment).await {
                warn!("failed to persist completed assignment {}: {}", job_id, e);
            }
        }
        if let Some(waiter) = pending.waiter.take() {
            let _ = waiter.send(AssignmentResult::Completed {
                output_path,
                output_size,
            });
        }
    }

    pub async fn handle_failed(&self, job_id: Uuid, error: String) {
        let pending = self.pending.lock().await.remove(&job_id);
        let Some(mut pending) = pending else {
            debug!("failure for unknown or already-resolved job {}", job_id);
            return;
        };
        self.release_job(&pending.encoder_id, job_id).await;
        self.mark_failed(job_id, &error).await;
        if let Some(waiter) = pending.waiter.take() {
            let _ = waiter.send(AssignmentResult::Failed { error });
        }
    }

    /// Send an explicit cancel for every pending job of an execution.
    pub async fn cancel_for_execution(&self, execution_id: Uuid, reason: &str) {
        let targets: Vec<(Uuid, String)> = {
            let pending = self.pending.lock().await;
            pending
                .iter()
                .filter(|(_, p)| p.execution_id == execution_id)
                .map(|(job_id, p)| (*job_id, p.encoder_id.clone()))
                .collect()
        };
        for (job_id, encoder_id) in targets {
            let tx = {
                let encoders = self.encoders.read().await;
                encoders.get(&encoder_id).map(|h| h.tx.clone())
            };
            if let Some(tx) = tx {
                let _ = tx
                    .send(ServerMessage::JobCancel {
                        job_id,
                        reason: reason.to_string(),
                    })
                    .await;
            }
            self.handle_failed(job_id, format!("cancelled: {}", reason))
                .await;
        }
    }

    /// Fail assignments left Pending/Running by a previous process run.
    ///
    /// Fresh connections mean none of those workers still report to us;
    /// their owning steps will re-dispatch when their executions resume.
    pub async fn fail_stale_assignments(&self) -> usize {
        let stale = match self.assignments.list_active().await {
            Ok(stale) => stale,
            Err(e) => {
                warn!("could not list stale assignments: {}", e);
                return 0;
            }
        };
        let count = stale.len();
        for assignment in stale {
            self.mark_failed(assignment.id, "orchestrator restarted").await;
        }
        count
    }

    pub async fn snapshots(&self) -> Vec<EncoderSnapshot> {
        let encoders = self.encoders.read().await;
        let mut out: Vec<EncoderSnapshot> = encoders
            .iter()
            .map(|(id, h)| EncoderSnapshot {
                encoder_id: id.clone(),
                capacity: h.capacity,
                in_flight: h.in_flight.len(),
                last_heartbeat_secs_ago: h.last_heartbeat.elapsed().as_secs(),
            })
            .collect();
        out.sort_by(|a, b| a.encoder_id.cmp(&b.encoder_id));
        out
    }

    async fn release_job(&self, encoder_id: &str, job_id: Uuid) {
        let mut encoders = self.encoders.write().await;
        if let Some(handle) = encoders.get_mut(encoder_id) {
            handle.in_flight.remove(&job_id);
        }
    }

    async fn fail_jobs(&self, job_ids: Vec<Uuid>, reason: &str) {
        for job_id in job_ids {
            let pending = self.pending.lock().await.remove(&job_id);
            self.mark_failed(job_id, reason).await;
            if let Some(mut pending) = pending {
                if let Some(waiter) = pending.waiter.take() {
                    let _ = waiter.send(AssignmentResult::Failed {
                        error: reason.to_string(),
                    });
                }
            }
        }
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) {
        if let Ok(mut assignment) = self.assignments.get(job_id).await {
            if matches!(
                assignment.status,
                AssignmentStatus::Completed | AssignmentStatus::Failed
            ) {
                return;
            }
            assignment.status = AssignmentStatus::Failed;
            assignment.error = Some(error.to_string());
            assignment.finished_at = Some(Utc::now());
            if let Err(e) = self.assignments.update(&assignment).await {
                warn!("failed to persist failed assignment {}: {}", job_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryAssignmentRepository;

    fn dispatcher() -> EncoderDispatcher {
        EncoderDispatcher::new(MemoryAssignmentRepository::new(), Duration::from_secs(60))
    }

    async fn connect(
        dispatcher: &EncoderDispatcher,
        id: &str,
        capacity: usize,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(8);
        dispatcher.register(id, capacity, tx).await;
        rx
    }

    #[tokio::test]
    async fn test_dispatch_no_encoders() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await;
        assert!(matches!(result, Err(DispatchError::NoEncoders)));
    }

    #[tokio::test]
    async fn test_capacity_rejects_immediately() {
        let dispatcher = dispatcher();
        let mut rx = connect(&dispatcher, "enc-1", 1).await;

        let first = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMessage::JobAssign { .. })));

        // Second offer while the only slot is taken: explicit failure, no
        // queueing.
        let second = dispatcher
            .dispatch(Uuid::new_v4(), "/in/b.mkv", TranscodeProfile::default())
            .await;
        assert!(matches!(second, Err(DispatchError::NoCapacity)));

        // Completing the first frees the slot.
        dispatcher
            .handle_completed(first.assignment_id, "/out/a.mkv".to_string(), 1024)
            .await;
        assert!(
            dispatcher
                .dispatch(Uuid::new_v4(), "/in/b.mkv", TranscodeProfile::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_completion_resolves_waiter() {
        let dispatcher = dispatcher();
        let _rx = connect(&dispatcher, "enc-1", 2).await;
        let handle = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();
        dispatcher
            .handle_completed(handle.assignment_id, "/out/a.mkv".to_string(), 2048)
            .await;
        match handle.completion.await.unwrap() {
            AssignmentResult::Completed {
                output_path,
                output_size,
            } => {
                assert_eq!(output_path, "/out/a.mkv");
                assert_eq!(output_size, 2048);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_orphans_running_jobs() {
        let dispatcher = dispatcher();
        let _rx = connect(&dispatcher, "enc-1", 2).await;
        let handle = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();

        dispatcher.deregister("enc-1", "socket closed").await;

        match handle.completion.await.unwrap() {
            AssignmentResult::Failed { error } => {
                assert!(error.contains("disconnected"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // The assignment record is terminal, not stuck Running.
        assert!(dispatcher.assignments.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_heartbeat_is_a_disconnect() {
        let dispatcher =
            EncoderDispatcher::new(MemoryAssignmentRepository::new(), Duration::from_millis(10));
        let _rx = connect(&dispatcher, "enc-1", 1).await;
        let handle = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(dispatcher.reap_stale().await, 1);

        assert!(matches!(
            handle.completion.await.unwrap(),
            AssignmentResult::Failed { .. }
        ));
        assert!(dispatcher.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_least_loaded_selection() {
        let dispatcher = dispatcher();
        let _rx1 = connect(&dispatcher, "enc-1", 4).await;
        let _rx2 = connect(&dispatcher, "enc-2", 4).await;

        let first = dispatcher
            .dispatch(Uuid::new_v4(), "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(Uuid::new_v4(), "/in/b.mkv", TranscodeProfile::default())
            .await
            .unwrap();
        assert_ne!(first.encoder_id, second.encoder_id);
    }

    #[tokio::test]
    async fn test_cancel_for_execution_sends_cancel_and_fails_job() {
        let dispatcher = dispatcher();
        let mut rx = connect(&dispatcher, "enc-1", 1).await;
        let execution_id = Uuid::new_v4();
        let handle = dispatcher
            .dispatch(execution_id, "/in/a.mkv", TranscodeProfile::default())
            .await
            .unwrap();
        let _ = rx.recv().await; // assign

        dispatcher
            .cancel_for_execution(execution_id, "execution cancelled")
            .await;

        match rx.recv().await {
            Some(ServerMessage::JobCancel { job_id, .. }) => {
                assert_eq!(job_id, handle.assignment_id)
            }
            other => panic!("expected cancel, got {:?}", other),
        }
        assert!(matches!(
            handle.completion.await.unwrap(),
            AssignmentResult::Failed { .. }
        ));
    }
}
