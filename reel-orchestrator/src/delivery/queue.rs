//! Bounded-concurrency delivery queue
//!
//! A fixed pool of drain workers pulls jobs off a FIFO backlog. Enqueueing
//! is idempotent per item id: while an item is queued or in flight, a
//! second enqueue is a silent no-op. Each job fans out to its (target,
//! profile) pairs sequentially and succeeds when at least one target took
//! the artifact. Completion updates the item's status, which recomputes
//! the owning request's aggregate view.

use std::collections::HashSet;
use std::sync::Arc;

use reel_core::domain::delivery::{DeliveryJob, DeliveryOutcome, TargetResult};
use reel_core::domain::media::ItemStatus;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::shipper::ArtifactShipper;
use crate::service::MediaService;

struct QueuedJob {
    job: DeliveryJob,
    done: oneshot::Sender<DeliveryOutcome>,
}

/// Result of an enqueue attempt
pub enum EnqueueResult {
    /// The job was accepted; the receiver resolves when it finishes.
    Accepted(oneshot::Receiver<DeliveryOutcome>),
    /// The item is already queued or in flight; nothing was added.
    Duplicate,
}

pub struct DeliveryQueue {
    tx: mpsc::Sender<QueuedJob>,
    /// Item ids currently queued or in flight.
    active: Arc<Mutex<HashSet<Uuid>>>,
}

impl DeliveryQueue {
    /// Spawn the drain workers and return the queue handle.
    pub fn start(
        workers: usize,
        backlog: usize,
        shipper: Arc<dyn ArtifactShipper>,
        media: Arc<MediaService>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<QueuedJob>(backlog);
        let rx = Arc::new(Mutex::new(rx));
        let active: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let active = Arc::clone(&active);
            let shipper = Arc::clone(&shipper);
            let media = Arc::clone(&media);
            tokio::spawn(async move {
                loop {
                    // Take the next job; holding the receiver lock only for
                    // the recv keeps the workers draining concurrently.
                    let queued = { rx.lock().await.recv().await };
                    let Some(queued) = queued else {
                        debug!("delivery worker {} shutting down", worker);
                        break;
                    };
                    let item_id = queued.job.item_id;
                    let outcome = drain_one(&shipper, &media, queued.job).await;
                    active.lock().await.remove(&item_id);
                    let _ = queued.done.send(outcome);
                }
            });
        }

        Arc::new(Self { tx, active })
    }

    /// Add a job to the backlog. Idempotent per item id.
    pub async fn enqueue(&self, job: DeliveryJob) -> EnqueueResult {
        {
            let mut active = self.active.lock().await;
            if !active.insert(job.item_id) {
                debug!("item {} already queued or in flight", job.item_id);
                return EnqueueResult::Duplicate;
            }
        }
        let (done_tx, done_rx) = oneshot::channel();
        let item_id = job.item_id;
        if self
            .tx
            .send(QueuedJob {
                job,
                done: done_tx,
            })
            .await
            .is_err()
        {
            // Workers are gone; roll back the reservation.
            self.active.lock().await.remove(&item_id);
            warn!("delivery queue is closed, dropping job for item {}", item_id);
            return EnqueueResult::Duplicate;
        }
        EnqueueResult::Accepted(done_rx)
    }

    /// Number of items queued or in flight.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

/// Ship one job to all its targets sequentially and apply the status side
/// effects.
async fn drain_one(
    shipper: &Arc<dyn ArtifactShipper>,
    media: &Arc<MediaService>,
    job: DeliveryJob,
) -> DeliveryOutcome {
    info!(
        "delivering item {} to {} target(s)",
        job.item_id,
        job.targets.len()
    );
    let mut results = Vec::with_capacity(job.targets.len());
    for target in &job.targets {
        match shipper.ship(&job.source_path, target).await {
            Ok(()) => {
                results.push(TargetResult {
                    target: target.name.clone(),
                    ok: true,
                    detail: None,
                });
            }
            Err(e) => {
                warn!(
                    "delivery of item {} to target {} failed: {:#}",
                    job.item_id, target.name, e
                );
                results.push(TargetResult {
                    target: target.name.clone(),
                    ok: false,
                    detail: Some(format!("{:#}", e)),
                });
            }
        }
    }

    let outcome = DeliveryOutcome {
        item_id: job.item_id,
        results,
    };

    // The item moves on; the request-level status is derived from items on
    // read, so this single write keeps both views consistent.
    let status = if outcome.succeeded() {
        ItemStatus::Available
    } else {
        ItemStatus::Failed
    };
    match media.set_item_status(job.item_id, status).await {
        Ok(request_status) => {
            info!(
                "item {} delivery {}, request now {}",
                job.item_id,
                if outcome.succeeded() { "succeeded" } else { "failed" },
                request_status
            );
        }
        Err(e) => warn!("could not update item {} after delivery: {}", job.item_id, e),
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryMediaRepository;
    use async_trait::async_trait;
    use reel_core::domain::delivery::DeliveryTarget;
    use reel_core::domain::media::RequestStatus;
    use reel_core::dto::api::{NewItem, SubmitRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Shipper that fails targets whose name starts with "bad" and can be
    /// slowed down to observe concurrency.
    struct FakeShipper {
        delay: Duration,
        shipped: AtomicUsize,
        peak: AtomicUsize,
        current: AtomicUsize,
    }

    impl FakeShipper {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                shipped: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtifactShipper for FakeShipper {
        async fn ship(&self, _source: &str, target: &DeliveryTarget) -> anyhow::Result<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.shipped.fetch_add(1, Ordering::SeqCst);
            if target.name.starts_with("bad") {
                anyhow::bail!("target unreachable");
            }
            Ok(())
        }
    }

    async fn media_with_item() -> (Arc<MediaService>, Uuid, Uuid) {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let request = media
            .submit(SubmitRequest {
                title: "Heat".to_string(),
                tmdb_id: 949,
                year: Some(1995),
                items: vec![NewItem {
                    season: None,
                    episode: None,
                }],
            })
            .await
            .unwrap();
        let item_id = media.detail(request.id).await.unwrap().items[0].id;
        (media, request.id, item_id)
    }

    fn job(item_id: Uuid, request_id: Uuid, targets: &[&str]) -> DeliveryJob {
        DeliveryJob {
            item_id,
            request_id,
            source_path: "/work/out/heat.mkv".to_string(),
            targets: targets
                .iter()
                .map(|name| DeliveryTarget {
                    name: name.to_string(),
                    root: format!("/mnt/{}", name),
                    profile: "flat".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_partial_target_failure_still_succeeds() {
        let (media, request_id, item_id) = media_with_item().await;
        let shipper = FakeShipper::new(Duration::from_millis(1));
        let queue = DeliveryQueue::start(2, 16, shipper, Arc::clone(&media));

        let EnqueueResult::Accepted(done) =
            queue.enqueue(job(item_id, request_id, &["bad-nas", "good-nas"])).await
        else {
            panic!("expected acceptance");
        };
        let outcome = done.await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.results.len(), 2);

        let detail = media.detail(request_id).await.unwrap();
        assert_eq!(detail.items[0].status, ItemStatus::Available);
        assert_eq!(detail.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_all_targets_failed_marks_item_failed() {
        let (media, request_id, item_id) = media_with_item().await;
        let queue = DeliveryQueue::start(
            1,
            16,
            FakeShipper::new(Duration::from_millis(1)),
            Arc::clone(&media),
        );

        let EnqueueResult::Accepted(done) =
            queue.enqueue(job(item_id, request_id, &["bad-1", "bad-2"])).await
        else {
            panic!("expected acceptance");
        };
        let outcome = done.await.unwrap();
        assert!(!outcome.succeeded());
        let detail = media.detail(request_id).await.unwrap();
        assert_eq!(detail.items[0].status, ItemStatus::Failed);
        assert_eq!(detail.status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let (media, request_id, item_id) = media_with_item().await;
        let queue = DeliveryQueue::start(
            1,
            16,
            FakeShipper::new(Duration::from_millis(50)),
            Arc::clone(&media),
        );

        let first = queue.enqueue(job(item_id, request_id, &["good"])).await;
        assert!(matches!(first, EnqueueResult::Accepted(_)));
        let second = queue.enqueue(job(item_id, request_id, &["good"])).await;
        assert!(matches!(second, EnqueueResult::Duplicate));
        assert_eq!(queue.active_count().await, 1);

        // After completion the id clears and re-enqueue works again.
        if let EnqueueResult::Accepted(done) = first {
            done.await.unwrap();
        }
        let third = queue.enqueue(job(item_id, request_id, &["good"])).await;
        assert!(matches!(third, EnqueueResult::Accepted(_)));
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let media = Arc::new(MediaService::new(MemoryMediaRepository::new()));
        let shipper = FakeShipper::new(Duration::from_millis(30));
        let queue = DeliveryQueue::start(2, 32, Arc::clone(&shipper) as Arc<dyn ArtifactShipper>, Arc::clone(&media));

        let mut receivers = Vec::new();
        for _ in 0..6 {
            // Unknown items: the status update fails quietly, which is fine
            // here; we only observe shipper concurrency.
            let result = queue
                .enqueue(job(Uuid::new_v4(), Uuid::new_v4(), &["good"]))
                .await;
            if let EnqueueResult::Accepted(done) = result {
                receivers.push(done);
            }
        }
        for done in receivers {
            let _ = done.await;
        }
        assert!(shipper.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(shipper.shipped.load(Ordering::SeqCst), 6);
    }
}
