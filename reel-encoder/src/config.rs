//! Encoder configuration
//!
//! Defines all configurable parameters for the encoder worker: identity,
//! orchestrator address, capacity, heartbeat cadence, and the ffmpeg
//! toolchain paths.

use std::time::Duration;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this encoder instance
    pub encoder_id: String,

    /// Orchestrator encoder port, host:port
    pub orchestrator_addr: String,

    /// Max concurrent transcode jobs this encoder accepts
    pub capacity: usize,

    /// How often to send heartbeats
    pub heartbeat_interval: Duration,

    /// Directory transcoded outputs are written to
    pub work_dir: String,

    /// ffmpeg binary
    pub ffmpeg_bin: String,

    /// ffprobe binary (duration probe for progress reporting)
    pub ffprobe_bin: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - ENCODER_ID (required)
    /// - ORCHESTRATOR_ADDR (required, host:port)
    /// - CAPACITY (optional, default: 1)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - WORK_DIR (optional, default: /var/lib/reel/work)
    /// - FFMPEG_BIN / FFPROBE_BIN (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let encoder_id = std::env::var("ENCODER_ID")
            .map_err(|_| anyhow::anyhow!("ENCODER_ID environment variable not set"))?;

        let orchestrator_addr = std::env::var("ORCHESTRATOR_ADDR")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_ADDR environment variable not set"))?;

        let capacity = std::env::var("CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1);

        let heartbeat_interval = std::env::var("HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let work_dir =
            std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/reel/work".to_string());

        let ffmpeg_bin = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string());
        let ffprobe_bin = std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string());

        Ok(Self {
            encoder_id,
            orchestrator_addr,
            capacity,
            heartbeat_interval,
            work_dir,
            ffmpeg_bin,
            ffprobe_bin,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.encoder_id.is_empty() {
            anyhow::bail!("encoder_id cannot be empty");
        }
        if !self.orchestrator_addr.contains(':') {
            anyhow::bail!("orchestrator_addr must be host:port");
        }
        if self.capacity == 0 {
            anyhow::bail!("capacity must be greater than 0");
        }
        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }
        if self.work_dir.is_empty() {
            anyhow::bail!("work_dir cannot be empty");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoder_id: format!("encoder-{}", uuid::Uuid::new_v4()),
            orchestrator_addr: "localhost:9090".to_string(),
            capacity: 1,
            heartbeat_interval: Duration::from_secs(30),
            work_dir: "/var/lib/reel/work".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capacity, 1);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.encoder_id = String::new();
        assert!(config.validate().is_err());

        config.encoder_id = "enc-1".to_string();
        config.orchestrator_addr = "no-port".to_string();
        assert!(config.validate().is_err());

        config.orchestrator_addr = "orchestrator:9090".to_string();
        config.capacity = 0;
        assert!(config.validate().is_err());
    }
}
