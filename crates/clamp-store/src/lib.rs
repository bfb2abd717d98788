//! Durable storage for the monotonic clamp filter.
//!
//! Cumulative counters (energy totals, working hours) must never appear to
//! decrease, including across daemon restarts when the in-memory clamp table
//! is empty. Last-accepted values are kept in a small SQLite database.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ClampStore {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl ClampStore {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = sqlite_url(path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS clamp_state (\
                key TEXT PRIMARY KEY,\
                value REAL NOT NULL,\
                updated_at INTEGER NOT NULL\
            )",
        )
        .execute(&pool)
        .await?;

        info!(path = %path, "clamp store initialized");

        Ok(Self { pool })
    }

    /// Last-accepted value per cumulative key, for seeding the filter.
    pub async fn load_all(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM clamp_state ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;

        let entries = rows
            .into_iter()
            .map(|row| (row.get::<String, _>("key"), row.get::<f64, _>("value")))
            .collect();

        Ok(entries)
    }

    pub async fn upsert_many(&self, entries: &[(String, f64)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                "INSERT INTO clamp_state (key, value, updated_at) VALUES (?, ?, ?)\
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,\
                 updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_ms())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Drop all persisted state, e.g. after a counter reset at the device.
    pub async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM clamp_state").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM clamp_state")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }
}

fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}?mode=rwc")
    }
}

fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
