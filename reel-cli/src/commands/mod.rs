//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod execution;
mod fleet;
mod request;
mod template;

pub use execution::ExecutionCommands;
pub use fleet::{BreakerCommands, EncoderCommands};
pub use request::RequestCommands;
pub use template::TemplateCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Media request management
    Request {
        #[command(subcommand)]
        command: RequestCommands,
    },
    /// Pipeline template management
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Execution management
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
    /// Encoder fleet visibility
    Encoder {
        #[command(subcommand)]
        command: EncoderCommands,
    },
    /// Circuit breaker visibility and reset
    Breaker {
        #[command(subcommand)]
        command: BreakerCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Request { command } => request::handle_request_command(command, config).await,
        Commands::Template { command } => template::handle_template_command(command, config).await,
        Commands::Execution { command } => {
            execution::handle_execution_command(command, config).await
        }
        Commands::Encoder { command } => fleet::handle_encoder_command(command, config).await,
        Commands::Breaker { command } => fleet::handle_breaker_command(command, config).await,
    }
}
