//! Template command handlers
//!
//! Templates are authored as JSON step trees and compiled server-side.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use reel_core::domain::template::TemplateSpec;
use reel_client::OrchestratorClient;
use uuid::Uuid;

use crate::config::Config;

/// Template subcommands
#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Create a template from an authored JSON file
    Create {
        /// Path to the template JSON
        file: String,
    },
    /// List all templates
    List,
    /// Get a template
    Get {
        /// Template ID
        id: Uuid,
    },
}

/// Handle template commands
pub async fn handle_template_command(command: TemplateCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        TemplateCommands::Create { file } => create_template(&client, &file).await,
        TemplateCommands::List => list_templates(&client).await,
        TemplateCommands::Get { id } => get_template(&client, id).await,
    }
}

async fn create_template(client: &OrchestratorClient, file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("could not read {}", file))?;
    let spec: TemplateSpec =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a valid template", file))?;

    let template = client.create_template(spec).await?;

    println!("{}", "Template created.".green().bold());
    println!("  ID:    {}", template.id);
    println!("  Name:  {}", template.name);
    println!("  Steps: {}", template.nodes.len());
    Ok(())
}

async fn list_templates(client: &OrchestratorClient) -> Result<()> {
    let templates = client.list_templates().await?;

    if templates.is_empty() {
        println!("{}", "No templates found.".yellow());
    } else {
        println!("{}", format!("Found {} template(s):", templates.len()).bold());
        println!();
        for template in templates {
            println!(
                "{}  {}  ({} step(s))",
                template.id,
                template.name.bold(),
                template.nodes.len()
            );
        }
    }

    Ok(())
}

async fn get_template(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let template = client.get_template(id).await?;

    println!("{}  {}", template.id, template.name.bold());
    for (idx, node) in template.nodes.iter().enumerate() {
        println!(
            "  [{}] {} ({}){}",
            idx,
            node.spec.name,
            node.spec.kind,
            if node.children.is_empty() {
                String::new()
            } else {
                format!("  children: {:?}", node.children)
            }
        );
    }
    Ok(())
}
