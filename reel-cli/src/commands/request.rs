//! Request command handlers
//!
//! Submit new media requests and inspect their items and derived status.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use reel_core::domain::media::{ItemStatus, RequestStatus};
use reel_core::dto::api::{NewItem, RequestDetail, SubmitRequest};
use reel_client::OrchestratorClient;
use uuid::Uuid;

use crate::config::Config;

/// Request subcommands
#[derive(Subcommand)]
pub enum RequestCommands {
    /// Submit a new request
    Submit {
        /// Title of the show or movie
        #[arg(long)]
        title: String,

        /// TMDB identifier
        #[arg(long)]
        tmdb_id: i64,

        /// Release year
        #[arg(long)]
        year: Option<i32>,

        /// Season number (episodes become items; omit for a movie)
        #[arg(long)]
        season: Option<i32>,

        /// Number of episodes in the season
        #[arg(long, default_value_t = 1)]
        episodes: i32,
    },
    /// List all requests
    List,
    /// Get request details
    Get {
        /// Request ID
        id: Uuid,
    },
}

/// Handle request commands
pub async fn handle_request_command(command: RequestCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        RequestCommands::Submit {
            title,
            tmdb_id,
            year,
            season,
            episodes,
        } => submit_request(&client, title, tmdb_id, year, season, episodes).await,
        RequestCommands::List => list_requests(&client).await,
        RequestCommands::Get { id } => get_request(&client, id).await,
    }
}

async fn submit_request(
    client: &OrchestratorClient,
    title: String,
    tmdb_id: i64,
    year: Option<i32>,
    season: Option<i32>,
    episodes: i32,
) -> Result<()> {
    let items = match season {
        Some(season) => (1..=episodes)
            .map(|episode| NewItem {
                season: Some(season),
                episode: Some(episode),
            })
            .collect(),
        None => vec![],
    };
    let request = client
        .submit_request(SubmitRequest {
            title,
            tmdb_id,
            year,
            items,
        })
        .await?;

    println!("{}", "Request submitted.".green().bold());
    println!("  ID:    {}", request.id);
    println!("  Title: {}", request.title);
    Ok(())
}

async fn list_requests(client: &OrchestratorClient) -> Result<()> {
    let requests = client.list_requests().await?;

    if requests.is_empty() {
        println!("{}", "No requests found.".yellow());
    } else {
        println!("{}", format!("Found {} request(s):", requests.len()).bold());
        println!();
        for detail in requests {
            print_request_summary(&detail);
        }
    }

    Ok(())
}

async fn get_request(client: &OrchestratorClient, id: Uuid) -> Result<()> {
    let detail = client.get_request(id).await?;

    print_request_summary(&detail);
    println!();
    for item in &detail.items {
        let place = match (item.season, item.episode) {
            (Some(s), Some(e)) => format!("S{:02}E{:02}", s, e),
            _ => "movie".to_string(),
        };
        println!(
            "  {} {} {} attempt(s){}",
            place,
            status_colored(item.status),
            item.attempts,
            item.error_history
                .last()
                .map(|e| format!("  last error: {}", e.message))
                .unwrap_or_default()
        );
    }

    Ok(())
}

fn print_request_summary(detail: &RequestDetail) {
    println!(
        "{}  {}  {}  ({} item(s))",
        detail.request.id,
        detail.request.title.bold(),
        request_status_colored(detail.status),
        detail.items.len()
    );
}

fn status_colored(status: ItemStatus) -> ColoredString {
    match status {
        ItemStatus::Available => status.to_string().green(),
        ItemStatus::Failed => status.to_string().red(),
        ItemStatus::Wanted => status.to_string().yellow(),
        _ => status.to_string().cyan(),
    }
}

fn request_status_colored(status: RequestStatus) -> ColoredString {
    match status {
        RequestStatus::Completed => status.to_string().green(),
        RequestStatus::Failed => status.to_string().red(),
        RequestStatus::PartiallyAvailable => status.to_string().yellow(),
        _ => status.to_string().cyan(),
    }
}
