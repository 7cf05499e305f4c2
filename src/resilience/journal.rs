// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite journal for the offline queue.
//!
//! Queued operations are written through to a local SQLite file so they
//! survive an app restart. The in-memory queue is the working copy; the
//! journal is only read back once, at startup.
//!
//! ```sql
//! CREATE TABLE offline_queue (
//!     id TEXT PRIMARY KEY,
//!     operation_name TEXT NOT NULL,
//!     payload TEXT NOT NULL,          -- JSON
//!     enqueued_at INTEGER NOT NULL,   -- epoch millis
//!     retry_count INTEGER NOT NULL,
//!     next_attempt_at INTEGER NOT NULL
//! );
//! ```

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::offline_queue::QueuedOperation;
use super::retry::{retry, RetryConfig};
use crate::storage::traits::StorageError;

pub struct QueueJournal {
    pool: SqlitePool,
    path: String,
}

impl QueueJournal {
    /// Open (or create) the journal at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path_str);

        info!(path = %path_str, "Opening offline queue journal");

        let pool = retry("queue_journal_open", &RetryConfig::startup(), || async {
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(5))
                .connect(&url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let journal = Self { pool, path: path_str };
        journal.init_schema().await?;
        Ok(journal)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set journal mode: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_queue (
                id TEXT PRIMARY KEY,
                operation_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to create offline_queue table: {}", e)))?;

        Ok(())
    }

    /// Insert or update one operation.
    pub async fn upsert(&self, op: &QueuedOperation) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&op.payload).map_err(|e| StorageError::Corruption {
            id: op.id.to_string(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO offline_queue (id, operation_name, payload, enqueued_at, retry_count, next_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                retry_count = excluded.retry_count,
                next_attempt_at = excluded.next_attempt_at
            "#,
        )
        .bind(op.id.to_string())
        .bind(&op.operation_name)
        .bind(payload)
        .bind(op.enqueued_at)
        .bind(i64::from(op.retry_count))
        .bind(op.next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to journal queued operation: {}", e)))?;

        debug!(id = %op.id, operation = %op.operation_name, "Queued operation journaled");
        Ok(())
    }

    pub async fn remove(&self, id: &uuid::Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM offline_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to remove queued operation: {}", e)))?;
        Ok(())
    }

    /// Every journaled operation, oldest first. Rows that fail to decode are
    /// logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<QueuedOperation>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, operation_name, payload, enqueued_at, retry_count, next_attempt_at \
             FROM offline_queue ORDER BY enqueued_at, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to load offline queue: {}", e)))?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_row(&row) {
                Ok(op) => ops.push(op),
                Err(e) => warn!(error = %e, "Skipping unreadable journal row"),
            }
        }
        Ok(ops)
    }

    pub async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM offline_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let cnt: i64 = row.try_get("cnt").map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(cnt as u64)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueuedOperation, StorageError> {
    let backend = |e: sqlx::Error| StorageError::Backend(e.to_string());

    let id: String = row.try_get("id").map_err(backend)?;
    let payload: String = row.try_get("payload").map_err(backend)?;
    let retry_count: i64 = row.try_get("retry_count").map_err(backend)?;

    let corrupt = |reason: String| StorageError::Corruption { id: id.clone(), reason };
    Ok(QueuedOperation {
        id: id.parse().map_err(|e: uuid::Error| corrupt(e.to_string()))?,
        operation_name: row.try_get("operation_name").map_err(backend)?,
        payload: serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?,
        enqueued_at: row.try_get("enqueued_at").map_err(backend)?,
        retry_count: u32::try_from(retry_count).map_err(|e| corrupt(e.to_string()))?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(backend)?,
    })
}
