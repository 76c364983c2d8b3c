//! Media request/item repository

use async_trait::async_trait;
use reel_core::domain::media::{ErrorHistoryEntry, ItemStatus, MediaItem, MediaRequest};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{RepoError, RepoResult};

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn create_request(&self, request: &MediaRequest, items: &[MediaItem]) -> RepoResult<()>;
    async fn get_request(&self, id: Uuid) -> RepoResult<MediaRequest>;
    async fn list_requests(&self) -> RepoResult<Vec<MediaRequest>>;
    async fn items_for(&self, request_id: Uuid) -> RepoResult<Vec<MediaItem>>;
    async fn get_item(&self, id: Uuid) -> RepoResult<MediaItem>;
    /// Full-row update; the caller owns the read-modify-write cycle per item.
    async fn update_item(&self, item: &MediaItem) -> RepoResult<()>;
}

/// Postgres-backed media repository
pub struct PgMediaRepository {
    pool: PgPool,
}

impl PgMediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_status_to_str(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Wanted => "Wanted",
        ItemStatus::Searching => "Searching",
        ItemStatus::Downloading => "Downloading",
        ItemStatus::Encoding => "Encoding",
        ItemStatus::Delivering => "Delivering",
        ItemStatus::Available => "Available",
        ItemStatus::Failed => "Failed",
    }
}

fn item_status_from_str(s: &str) -> RepoResult<ItemStatus> {
    match s {
        "Wanted" => Ok(ItemStatus::Wanted),
        "Searching" => Ok(ItemStatus::Searching),
        "Downloading" => Ok(ItemStatus::Downloading),
        "Encoding" => Ok(ItemStatus::Encoding),
        "Delivering" => Ok(ItemStatus::Delivering),
        "Available" => Ok(ItemStatus::Available),
        "Failed" => Ok(ItemStatus::Failed),
        other => Err(RepoError::Storage(format!("unknown item status: {}", other))),
    }
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> RepoResult<MediaItem> {
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;
    let history: serde_json::Value = row.try_get("error_history")?;
    let error_history: Vec<ErrorHistoryEntry> = serde_json::from_value(history)?;
    Ok(MediaItem {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        season: row.try_get("season")?,
        episode: row.try_get("episode")?,
        status: item_status_from_str(&status)?,
        attempts: attempts as u32,
        next_attempt_at: row.try_get("next_attempt_at")?,
        error_history,
    })
}

#[async_trait]
impl MediaRepository for PgMediaRepository {
    async fn create_request(&self, request: &MediaRequest, items: &[MediaItem]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO requests (id, title, tmdb_id, year, requested_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(request.id)
        .bind(&request.title)
        .bind(request.tmdb_id)
        .bind(request.year)
        .bind(request.requested_at)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO items
                    (id, request_id, season, episode, status, attempts, next_attempt_at, error_history)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(item.request_id)
            .bind(item.season)
            .bind(item.episode)
            .bind(item_status_to_str(item.status))
            .bind(item.attempts as i32)
            .bind(item.next_attempt_at)
            .bind(serde_json::to_value(&item.error_history)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> RepoResult<MediaRequest> {
        let row = sqlx::query(
            "SELECT id, title, tmdb_id, year, requested_at FROM requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::NotFound(format!("request {}", id)))?;
        Ok(MediaRequest {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            tmdb_id: row.try_get("tmdb_id")?,
            year: row.try_get("year")?,
            requested_at: row.try_get("requested_at")?,
        })
    }

    async fn list_requests(&self) -> RepoResult<Vec<MediaRequest>> {
        let rows = sqlx::query(
            "SELECT id, title, tmdb_id, year, requested_at FROM requests ORDER BY requested_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(MediaRequest {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    tmdb_id: row.try_get("tmdb_id")?,
                    year: row.try_get("year")?,
                    requested_at: row.try_get("requested_at")?,
                })
            })
            .collect()
    }

    async fn items_for(&self, request_id: Uuid) -> RepoResult<Vec<MediaItem>> {
        let rows = sqlx::query(
            "SELECT id, request_id, season, episode, status, attempts, next_attempt_at, error_history
             FROM items WHERE request_id = $1 ORDER BY season NULLS FIRST, episode NULLS FIRST",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn get_item(&self, id: Uuid) -> RepoResult<MediaItem> {
        let row = sqlx::query(
            "SELECT id, request_id, season, episode, status, attempts, next_attempt_at, error_history
             FROM items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepoError::NotFound(format!("item {}", id)))?;
        row_to_item(&row)
    }

    async fn update_item(&self, item: &MediaItem) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET status = $2, attempts = $3, next_attempt_at = $4, error_history = $5
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item_status_to_str(item.status))
        .bind(item.attempts as i32)
        .bind(item.next_attempt_at)
        .bind(serde_json::to_value(&item.error_history)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("item {}", item.id)));
        }
        Ok(())
    }
}
