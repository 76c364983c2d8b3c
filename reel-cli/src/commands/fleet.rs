//! Encoder fleet and circuit breaker command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_core::domain::breaker::CircuitState;
use reel_client::OrchestratorClient;

use crate::config::Config;

/// Encoder subcommands
#[derive(Subcommand)]
pub enum EncoderCommands {
    /// List connected encoders
    List,
}

/// Breaker subcommands
#[derive(Subcommand)]
pub enum BreakerCommands {
    /// List circuit breakers
    List,
    /// Reset a circuit breaker
    Reset {
        /// Service name, e.g. "indexer" or "downloader"
        service: String,
    },
}

/// Handle encoder commands
pub async fn handle_encoder_command(command: EncoderCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        EncoderCommands::List => {
            let encoders = client.list_encoders().await?;
            if encoders.is_empty() {
                println!("{}", "No encoders connected.".yellow());
                return Ok(());
            }
            println!("{}", format!("{} encoder(s) connected:", encoders.len()).bold());
            for encoder in encoders {
                println!(
                    "  {}  {}/{} slot(s) in use, heartbeat {}s ago",
                    encoder.encoder_id.bold(),
                    encoder.in_flight,
                    encoder.capacity,
                    encoder.last_heartbeat_secs_ago
                );
            }
            Ok(())
        }
    }
}

/// Handle breaker commands
pub async fn handle_breaker_command(command: BreakerCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        BreakerCommands::List => {
            let breakers = client.list_breakers().await?;
            if breakers.is_empty() {
                println!("{}", "No circuit breakers recorded.".yellow());
                return Ok(());
            }
            for record in breakers {
                let state = match record.state {
                    CircuitState::Closed => record.state.to_string().green(),
                    CircuitState::HalfOpen => record.state.to_string().yellow(),
                    CircuitState::Open => record.state.to_string().red(),
                };
                println!(
                    "  {}  {}  {} failure(s){}",
                    record.service.bold(),
                    state,
                    record.failures,
                    record
                        .opens_until
                        .map(|t| format!(", open until {}", t))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        BreakerCommands::Reset { service } => {
            client.reset_breaker(&service).await?;
            println!("{}", format!("Circuit breaker {} reset.", service).green());
            Ok(())
        }
    }
}
