//! Encoder connection server
//!
//! Accepts encoder TCP connections and runs one supervisor task per socket.
//! A connection has no identity until its first line parses as a valid
//! `register`; anything else (or handshake silence) drops the socket.
//! Outbound traffic goes through a per-connection channel drained by a
//! writer task, so the pool never touches the socket directly.

use std::sync::Arc;
use std::time::Duration;

use reel_core::protocol::{self, EncoderMessage, ServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::pool::EncoderDispatcher;

const OUTBOUND_QUEUE: usize = 32;

pub struct EncoderServer {
    dispatcher: Arc<EncoderDispatcher>,
    bind_addr: String,
    handshake_timeout: Duration,
    reap_interval: Duration,
}

impl EncoderServer {
    pub fn new(
        dispatcher: Arc<EncoderDispatcher>,
        bind_addr: String,
        handshake_timeout: Duration,
        reap_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            bind_addr,
            handshake_timeout,
            reap_interval,
        }
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!("encoder server listening on {}", self.bind_addr);

        self.start_reaper();

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("encoder connection from {}", peer);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let handshake_timeout = self.handshake_timeout;
                    tokio::spawn(async move {
                        handle_connection(dispatcher, stream, handshake_timeout).await;
                    });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                }
            }
        }
    }

    /// Periodically treat stale heartbeats as disconnects.
    fn start_reaper(&self) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = self.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let reaped = dispatcher.reap_stale().await;
                if reaped > 0 {
                    warn!("reaped {} stale encoder(s)", reaped);
                }
            }
        });
    }
}

async fn handle_connection(
    dispatcher: Arc<EncoderDispatcher>,
    stream: TcpStream,
    handshake_timeout: Duration,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Identity is established only by a valid register as the first line.
    let first = match timeout(handshake_timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            debug!("handshake read failed: {}", e);
            return;
        }
        Err(_) => {
            debug!("handshake timed out, dropping connection");
            return;
        }
    };
    let (encoder_id, capacity) = match protocol::decode_line::<EncoderMessage>(&first) {
        Ok(EncoderMessage::Register {
            encoder_id,
            capacity,
        }) => (encoder_id, capacity),
        Ok(other) => {
            warn!("first message was {:?}, not register; dropping", other);
            return;
        }
        Err(e) => {
            warn!("malformed handshake ({}); dropping", e);
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    // Writer task owns the write half; dropping the channel ends it.
    let writer_id = encoder_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let line = match protocol::encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    error!("could not encode message for {}: {}", writer_id, e);
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                debug!("write to encoder {} failed: {}", writer_id, e);
                break;
            }
        }
    });

    let _ = tx
        .send(ServerMessage::RegisterAck {
            encoder_id: encoder_id.clone(),
        })
        .await;
    dispatcher.register(&encoder_id, capacity, tx).await;

    // Read loop: the connection's supervisor. Malformed lines are logged
    // and skipped; unknown message types are ignored for forward
    // compatibility.
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let message = match protocol::decode_line::<EncoderMessage>(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("malformed message from {}: {}", encoder_id, e);
                        continue;
                    }
                };
                handle_message(&dispatcher, &encoder_id, message).await;
            }
            Ok(None) => {
                debug!("encoder {} closed the connection", encoder_id);
                break;
            }
            Err(e) => {
                debug!("read from encoder {} failed: {}", encoder_id, e);
                break;
            }
        }
    }

    dispatcher.deregister(&encoder_id, "connection closed").await;
    writer.abort();
}

async fn handle_message(
    dispatcher: &EncoderDispatcher,
    encoder_id: &str,
    message: EncoderMessage,
) {
    match message {
        EncoderMessage::Register { .. } => {
            warn!("duplicate register from {}, ignoring", encoder_id);
        }
        EncoderMessage::Heartbeat => {
            dispatcher.heartbeat(encoder_id).await;
        }
        EncoderMessage::JobProgress { job_id, percent } => {
            dispatcher.handle_progress(job_id, percent).await;
        }
        EncoderMessage::JobCompleted {
            job_id,
            output_path,
            output_size,
        } => {
            dispatcher
                .handle_completed(job_id, output_path, output_size)
                .await;
        }
        EncoderMessage::JobFailed { job_id, error } => {
            dispatcher.handle_failed(job_id, error).await;
        }
        EncoderMessage::Unknown => {
            debug!("unknown message type from {}, ignoring", encoder_id);
        }
    }
}
