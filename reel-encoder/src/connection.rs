//! Orchestrator connection
//!
//! One session per TCP connection: register first, then heartbeat on a
//! timer while the read loop handles assignments and cancels. Outbound
//! traffic funnels through a channel drained by a writer task, so job
//! tasks and the heartbeat never touch the socket directly. A lost
//! connection tears down every running job; the orchestrator orphan-fails
//! them on its side and the main loop reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use reel_core::domain::encoding::EncodingAssignment;
use reel_core::protocol::{self, EncoderMessage, ServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::transcode::JobRunner;

const OUTBOUND_QUEUE: usize = 32;

pub struct EncoderSession {
    config: Config,
    runner: Arc<dyn JobRunner>,
}

impl EncoderSession {
    pub fn new(config: Config, runner: Arc<dyn JobRunner>) -> Self {
        Self { config, runner }
    }

    /// Run one connection until it drops.
    pub async fn run(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.config.orchestrator_addr)
            .await
            .with_context(|| format!("could not connect to {}", self.config.orchestrator_addr))?;
        info!("connected to orchestrator at {}", self.config.orchestrator_addr);

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let (tx, mut rx) = mpsc::channel::<EncoderMessage>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let line = match protocol::encode_line(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("could not encode message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!("write to orchestrator failed: {}", e);
                    break;
                }
            }
        });

        tx.send(EncoderMessage::Register {
            encoder_id: self.config.encoder_id.clone(),
            capacity: self.config.capacity,
        })
        .await
        .context("could not send register")?;

        let heartbeat = {
            let tx = tx.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick carries no news
                loop {
                    ticker.tick().await;
                    if tx.send(EncoderMessage::Heartbeat).await.is_err() {
                        break;
                    }
                }
            })
        };

        let active: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Read loop: assignments and cancels until the connection drops.
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let message = match protocol::decode_line::<ServerMessage>(&line) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("malformed message from orchestrator: {}", e);
                            continue;
                        }
                    };
                    match message {
                        ServerMessage::RegisterAck { encoder_id } => {
                            info!("registered as {}", encoder_id);
                        }
                        ServerMessage::JobAssign { assignment } => {
                            self.spawn_job(assignment, tx.clone(), Arc::clone(&active))
                                .await;
                        }
                        ServerMessage::JobCancel { job_id, reason } => {
                            if let Some(handle) = active.lock().await.remove(&job_id) {
                                info!("cancelling job {}: {}", job_id, reason);
                                handle.abort();
                            } else {
                                debug!("cancel for unknown job {}", job_id);
                            }
                        }
                        ServerMessage::Unknown => {
                            debug!("unknown message type from orchestrator, ignoring");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("read from orchestrator failed: {}", e);
                    break;
                }
            }
        }

        heartbeat.abort();
        for (job_id, handle) in active.lock().await.drain() {
            warn!("connection lost with job {} in flight, aborting", job_id);
            handle.abort();
        }
        writer.abort();
        anyhow::bail!("connection to orchestrator lost")
    }

    async fn spawn_job(
        &self,
        assignment: EncodingAssignment,
        tx: mpsc::Sender<EncoderMessage>,
        active: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    ) {
        let job_id = assignment.id;
        info!(
            "assigned job {} ({} -> {})",
            job_id, assignment.source_path, assignment.profile.name
        );
        let runner = Arc::clone(&self.runner);
        let task_active = Arc::clone(&active);
        let handle = tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel::<f32>(16);
            let forwarder = {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(percent) = progress_rx.recv().await {
                        let _ = tx.send(EncoderMessage::JobProgress { job_id, percent }).await;
                    }
                })
            };

            let result = runner.run(&assignment, progress_tx).await;
            // The runner dropped its sender; let the forwarder flush.
            let _ = forwarder.await;

            let message = match result {
                Ok(output) => {
                    info!("job {} completed: {}", job_id, output.path);
                    EncoderMessage::JobCompleted {
                        job_id,
                        output_path: output.path,
                        output_size: output.size_bytes,
                    }
                }
                Err(e) => {
                    warn!("job {} failed: {:#}", job_id, e);
                    EncoderMessage::JobFailed {
                        job_id,
                        error: format!("{:#}", e),
                    }
                }
            };
            let _ = tx.send(message).await;
            task_active.lock().await.remove(&job_id);
        });
        active.lock().await.insert(job_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::TranscodeOutput;
    use async_trait::async_trait;
    use reel_core::domain::encoding::TranscodeProfile;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    struct FakeRunner {
        delay: Duration,
        finished: AtomicBool,
    }

    impl FakeRunner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                finished: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run(
            &self,
            assignment: &EncodingAssignment,
            progress: mpsc::Sender<f32>,
        ) -> Result<TranscodeOutput> {
            let _ = progress.send(50.0).await;
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(TranscodeOutput {
                path: format!("/out/{}.mkv", assignment.id),
                size_bytes: 1024,
            })
        }
    }

    struct FakeOrchestrator {
        lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        write: tokio::net::tcp::OwnedWriteHalf,
    }

    impl FakeOrchestrator {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, write) = stream.into_split();
            Self {
                lines: BufReader::new(read).lines(),
                write,
            }
        }

        async fn recv(&mut self) -> EncoderMessage {
            let line = self.lines.next_line().await.unwrap().unwrap();
            protocol::decode_line(&line).unwrap()
        }

        /// Next message that is not a heartbeat or progress report.
        async fn recv_terminal(&mut self) -> EncoderMessage {
            loop {
                match self.recv().await {
                    EncoderMessage::Heartbeat | EncoderMessage::JobProgress { .. } => continue,
                    other => return other,
                }
            }
        }

        async fn send(&mut self, message: &ServerMessage) {
            let line = protocol::encode_line(message).unwrap();
            self.write.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn session_config(addr: std::net::SocketAddr) -> Config {
        Config {
            encoder_id: "enc-test".to_string(),
            orchestrator_addr: addr.to_string(),
            capacity: 2,
            heartbeat_interval: Duration::from_secs(30),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_registers_then_runs_assignment_to_completion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = FakeRunner::new(Duration::from_millis(5));
        let session = EncoderSession::new(session_config(addr), runner);
        tokio::spawn(async move { session.run().await });

        let mut orchestrator = FakeOrchestrator::accept(&listener).await;
        match orchestrator.recv().await {
            EncoderMessage::Register {
                encoder_id,
                capacity,
            } => {
                assert_eq!(encoder_id, "enc-test");
                assert_eq!(capacity, 2);
            }
            other => panic!("expected register, got {:?}", other),
        }
        orchestrator
            .send(&ServerMessage::RegisterAck {
                encoder_id: "enc-test".to_string(),
            })
            .await;

        let assignment = EncodingAssignment::new(
            Uuid::new_v4(),
            "enc-test",
            "/in/a.mkv",
            TranscodeProfile::default(),
        );
        orchestrator
            .send(&ServerMessage::JobAssign {
                assignment: assignment.clone(),
            })
            .await;

        match timeout(Duration::from_secs(2), orchestrator.recv_terminal())
            .await
            .unwrap()
        {
            EncoderMessage::JobCompleted {
                job_id,
                output_path,
                output_size,
            } => {
                assert_eq!(job_id, assignment.id);
                assert!(output_path.contains(&assignment.id.to_string()));
                assert_eq!(output_size, 1024);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_job() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let runner = FakeRunner::new(Duration::from_secs(30));
        let session = EncoderSession::new(session_config(addr), Arc::clone(&runner) as Arc<dyn JobRunner>);
        tokio::spawn(async move { session.run().await });

        let mut orchestrator = FakeOrchestrator::accept(&listener).await;
        let _ = orchestrator.recv().await; // register

        let assignment = EncodingAssignment::new(
            Uuid::new_v4(),
            "enc-test",
            "/in/a.mkv",
            TranscodeProfile::default(),
        );
        orchestrator
            .send(&ServerMessage::JobAssign {
                assignment: assignment.clone(),
            })
            .await;
        // Give the job task a moment to start, then cancel it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator
            .send(&ServerMessage::JobCancel {
                job_id: assignment.id,
                reason: "execution cancelled".to_string(),
            })
            .await;

        // No terminal message should follow the cancel.
        let quiet = timeout(Duration::from_millis(100), orchestrator.recv_terminal()).await;
        assert!(quiet.is_err());
        assert!(!runner.finished.load(Ordering::SeqCst));
    }
}
