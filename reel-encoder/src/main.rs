//! Reel Encoder
//!
//! A remote transcode worker. It holds one persistent TCP connection to the
//! orchestrator, registers with a declared capacity, heartbeats, and runs
//! assigned ffmpeg jobs, streaming progress back over the same connection.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Connection: register/heartbeat/read-loop session over TCP
//! - Transcode: ffmpeg subprocess execution with progress parsing
//!
//! The connection loop reconnects with capped exponential backoff; the
//! orchestrator orphan-fails whatever the encoder held when it vanished.

mod config;
mod connection;
mod transcode;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::connection::EncoderSession;
use crate::transcode::Transcoder;

const INITIAL_RECONNECT_DELAY_MS: u64 = 500;
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_encoder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reel Encoder");

    let config = load_config()?;
    info!(
        "Loaded configuration: encoder_id={}, orchestrator={}, capacity={}",
        config.encoder_id, config.orchestrator_addr, config.capacity
    );

    let runner = Arc::new(Transcoder::new(&config));
    let session = EncoderSession::new(config, runner);

    // The orchestrator may not be up yet, and connections drop; keep
    // reconnecting with capped exponential backoff.
    let mut delay_ms = INITIAL_RECONNECT_DELAY_MS;
    loop {
        let started = std::time::Instant::now();
        if let Err(e) = session.run().await {
            warn!("session ended: {:#}", e);
        }
        // A session that held for a while earns a fresh backoff.
        if started.elapsed() > Duration::from_secs(60) {
            delay_ms = INITIAL_RECONNECT_DELAY_MS;
        }
        info!("reconnecting in {} ms", delay_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        delay_ms = (delay_ms * 2).min(MAX_RECONNECT_DELAY_MS);
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
