use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create requests table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id UUID PRIMARY KEY,
            title VARCHAR(512) NOT NULL,
            tmdb_id BIGINT NOT NULL,
            year INTEGER,
            requested_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create items table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id UUID PRIMARY KEY,
            request_id UUID NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            season INTEGER,
            episode INTEGER,
            status VARCHAR(50) NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ,
            error_history JSONB NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create templates table (compiled arena stored as a document)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            doc JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            request_id UUID NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            item_id UUID NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            template_id UUID NOT NULL REFERENCES templates(id),
            status VARCHAR(50) NOT NULL,
            context JSONB NOT NULL DEFAULT '{}',
            cursor INTEGER,
            error TEXT,
            started_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create step log table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS step_executions (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
            step_name VARCHAR(255) NOT NULL,
            position INTEGER NOT NULL,
            outcome VARCHAR(50) NOT NULL,
            error TEXT,
            started_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create circuit breaker table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS breakers (
            service VARCHAR(255) PRIMARY KEY,
            state VARCHAR(50) NOT NULL,
            failures INTEGER NOT NULL DEFAULT 0,
            successes INTEGER NOT NULL DEFAULT 0,
            last_failure TIMESTAMPTZ,
            opens_until TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create encoding assignments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            id UUID PRIMARY KEY,
            execution_id UUID NOT NULL,
            encoder_id VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            source_path TEXT NOT NULL,
            profile JSONB NOT NULL,
            progress_percent REAL NOT NULL DEFAULT 0,
            output_path TEXT,
            output_size BIGINT,
            error TEXT,
            assigned_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_request_id ON items(request_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_status ON items(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_request_id ON executions(request_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_step_executions_execution_id
         ON step_executions(execution_id, started_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assignments_status ON assignments(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
