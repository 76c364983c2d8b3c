//! Execution command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_core::domain::execution::ExecutionStatus;
use reel_client::OrchestratorClient;
use uuid::Uuid;

use crate::config::Config;

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Start executions for a request
    Start {
        /// Request ID
        #[arg(long)]
        request: Uuid,

        /// Template ID
        #[arg(long)]
        template: Uuid,
    },
    /// Get execution details with the step log
    Get {
        /// Execution ID
        id: Uuid,
    },
    /// Cancel an execution
    Cancel {
        /// Execution ID
        id: Uuid,
    },
    /// Resume a paused execution
    Resume {
        /// Execution ID
        id: Uuid,
    },
}

/// Handle execution commands
pub async fn handle_execution_command(command: ExecutionCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        ExecutionCommands::Start { request, template } => {
            let started = client.start_execution(request, template).await?;
            println!(
                "{}",
                format!("Started {} execution(s):", started.execution_ids.len())
                    .green()
                    .bold()
            );
            for id in started.execution_ids {
                println!("  {}", id);
            }
            Ok(())
        }
        ExecutionCommands::Get { id } => get_execution(&client, id).await,
        ExecutionCommands::Cancel { id } => {
            client.cancel_execution(id).await?;
            println!("{}", format!("Execution {} cancelled.", id).yellow());
            Ok(())
        }
        ExecutionCommands::Resume { id } => {
            client.resume_execution(id).await?;
            println!("{}", format!("Execution {} resumed.", id).green());
            Ok(())
        }
    }
}

async fn get_execution(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let detail = client.get_execution(id).await?;
    let execution = &detail.execution;

    println!(
        "{}  {}  cursor {:?}",
        execution.id,
        status_colored(execution.status),
        execution.cursor
    );
    if let Some(error) = &execution.error {
        println!("  error: {}", error.red());
    }
    if detail.steps.is_empty() {
        println!("{}", "  no steps executed yet".yellow());
    }
    for step in &detail.steps {
        println!(
            "  [{}] {} {}{}",
            step.position,
            step.step_name,
            step.outcome,
            step.error
                .as_deref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn status_colored(status: ExecutionStatus) -> ColoredString {
    match status {
        ExecutionStatus::Completed => status.to_string().green(),
        ExecutionStatus::Failed => status.to_string().red(),
        ExecutionStatus::Paused | ExecutionStatus::Cancelled => status.to_string().yellow(),
        ExecutionStatus::Running => status.to_string().cyan(),
    }
}
