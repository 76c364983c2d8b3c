//! Reel Orchestrator
//!
//! The single orchestrator process: HTTP API, pipeline engine, encoder
//! dispatch server, and delivery queue. State lives in Postgres behind the
//! repository traits; remote encoders connect over TCP and are handed
//! transcode jobs by the dispatcher.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod delivery;
pub mod dispatch;
pub mod engine;
pub mod repository;
pub mod service;

use crate::config::Config;
use crate::delivery::{DeliveryQueue, FsArtifactShipper};
use crate::dispatch::{EncoderDispatcher, EncoderServer};
use crate::engine::collaborators::{HttpDownloadClient, HttpSearchProvider};
use crate::engine::steps::{DeliverStep, DownloadStep, SearchStep, TranscodeStep};
use crate::engine::{CircuitBreakerRegistry, PipelineEngine, RetryStrategy, StepRegistry};
use crate::repository::{
    PgAssignmentRepository, PgBreakerRepository, PgExecutionRepository, PgMediaRepository,
    PgTemplateRepository,
};
use crate::service::MediaService;
use reel_core::domain::template::StepKind;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reel_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reel Orchestrator...");

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;

    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Repositories
    let media_repo = Arc::new(PgMediaRepository::new(pool.clone()));
    let template_repo = Arc::new(PgTemplateRepository::new(pool.clone()));
    let execution_repo = Arc::new(PgExecutionRepository::new(pool.clone()));
    let breaker_repo = Arc::new(PgBreakerRepository::new(pool.clone()));
    let assignment_repo = Arc::new(PgAssignmentRepository::new(pool.clone()));

    // Services and shared registries
    let media = Arc::new(MediaService::new(media_repo));
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker, breaker_repo));
    let hydrated = breakers
        .hydrate()
        .await
        .context("Failed to load circuit breaker state")?;
    info!("Loaded {} circuit breaker record(s)", hydrated);

    let retry = Arc::new(RetryStrategy::new(config.retry, Arc::clone(&breakers)));

    let dispatcher = Arc::new(EncoderDispatcher::new(
        assignment_repo,
        config.heartbeat_timeout,
    ));
    // Assignments from a previous run have no live worker behind them.
    let orphaned = dispatcher.fail_stale_assignments().await;
    if orphaned > 0 {
        info!("Failed {} stale assignment(s) from a previous run", orphaned);
    }

    let delivery = DeliveryQueue::start(
        config.delivery_workers,
        config.delivery_backlog,
        Arc::new(FsArtifactShipper::new()),
        Arc::clone(&media),
    );

    // Step registry: one implementation per step kind, validated against
    // templates at start time.
    let mut registry = StepRegistry::new();
    registry.register(
        StepKind::Search,
        Arc::new(SearchStep::new(
            Arc::new(HttpSearchProvider::new(&config.indexer_url)),
            Arc::clone(&media),
        )),
    );
    registry.register(
        StepKind::Download,
        Arc::new(DownloadStep::new(
            Arc::new(HttpDownloadClient::new(&config.downloader_url)),
            Arc::clone(&media),
        )),
    );
    registry.register(
        StepKind::Transcode,
        Arc::new(TranscodeStep::new(
            Arc::clone(&dispatcher),
            Arc::clone(&media),
        )),
    );
    registry.register(
        StepKind::Deliver,
        Arc::new(DeliverStep::new(Arc::clone(&delivery), Arc::clone(&media))),
    );
    let registry = Arc::new(registry);

    let engine = PipelineEngine::new(
        Arc::clone(&registry),
        retry,
        execution_repo.clone(),
        template_repo.clone(),
        Arc::clone(&media),
        Arc::clone(&dispatcher),
    );

    // Executions a crashed process left Running continue from their
    // persisted cursors.
    let recovered = engine
        .recover()
        .await
        .context("Failed to recover running executions")?;
    if recovered > 0 {
        info!("Recovered {} running execution(s)", recovered);
    }

    // Encoder TCP server
    let encoder_server = EncoderServer::new(
        Arc::clone(&dispatcher),
        config.encoder_bind_addr.clone(),
        config.handshake_timeout,
        config.reap_interval,
    );
    tokio::spawn(async move {
        if let Err(e) = encoder_server.run().await {
            tracing::error!("Encoder server exited: {}", e);
        }
    });

    // HTTP API
    let state = api::AppState {
        media,
        engine,
        dispatcher,
        breakers,
        registry,
        templates: template_repo,
        executions: execution_repo,
    };
    let app = api::create_router(state);

    info!("Listening on {}", config.api_bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .context("Failed to bind API address")?;
    axum::serve(listener, app).await.context("API server exited")?;

    Ok(())
}
