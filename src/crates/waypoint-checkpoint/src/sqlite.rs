//! SQLite-backed checkpoint storage
//!
//! [`SqliteCheckpointStore`] persists checkpoints in a single table keyed by
//! `(thread_id, step)`. The full checkpoint document is stored as JSON in
//! `payload`; the remaining columns exist for querying without decoding it.
//!
//! ```text
//! checkpoints
//! ┌───────────┬──────┬───────────┬───────────┬─────────┬────────────┐
//! │ thread_id │ step │ node      │ status    │ payload │ created_at │
//! ├───────────┼──────┼───────────┼───────────┼─────────┼────────────┤
//! │ thread-1  │ 0    │ NULL      │ ready     │ {...}   │ 2024-...   │
//! │ thread-1  │ 1    │ intent    │ running   │ {...}   │ 2024-...   │
//! │ thread-1  │ 2    │ research  │ completed │ {...}   │ 2024-...   │
//! └───────────┴──────┴───────────┴───────────┴─────────┴────────────┘
//!            PRIMARY KEY (thread_id, step)
//! ```
//!
//! Writes run inside a transaction that checks the thread's latest step first,
//! so an out-of-order `put` fails with a conflict instead of a constraint error.

use crate::{
    checkpoint::{Checkpoint, CheckpointStatus, ThreadInfo},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointStore, CheckpointStream},
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id  TEXT    NOT NULL,
    step       INTEGER NOT NULL,
    node       TEXT,
    status     TEXT    NOT NULL,
    payload    TEXT    NOT NULL,
    created_at TEXT    NOT NULL,
    PRIMARY KEY (thread_id, step)
)";

/// Durable checkpoint store on a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    serializer: JsonSerializer,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) a database file with a default pool size of 5
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_max_connections(path, 5).await
    }

    /// Open a database file with a custom pool size
    pub async fn with_max_connections<P: AsRef<Path>>(path: P, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        debug!(path = %path.display(), max_connections, "Connecting to checkpoint database");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool).await?;
        info!(path = %path.display(), "Checkpoint database ready");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// Each SQLite connection to `:memory:` is its own database, so the pool is
    /// pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if missing
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            serializer: JsonSerializer::new(),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Checkpoint database closed");
    }

    fn decode(&self, row: &SqliteRow) -> Result<Checkpoint> {
        let payload: String = row.try_get("payload")?;
        self.serializer.loads_checkpoint(payload.as_bytes())
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width so lexical order in SQL matches chronological order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Storage(format!("invalid timestamp '{}': {}", raw, e)))
}

fn step_to_sql(step: u64) -> Result<i64> {
    i64::try_from(step).map_err(|_| CheckpointError::Invalid(format!("step {} out of range", step)))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        if checkpoint.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let step = step_to_sql(checkpoint.step)?;
        let payload = String::from_utf8(self.serializer.dumps(&checkpoint)?)
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let latest: Option<i64> =
            sqlx::query("SELECT MAX(step) AS latest FROM checkpoints WHERE thread_id = ?")
                .bind(&checkpoint.thread_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("latest")?;

        if let Some(latest) = latest {
            if step <= latest {
                return Err(CheckpointError::conflict(
                    &checkpoint.thread_id,
                    checkpoint.step,
                    latest as u64,
                ));
            }
        }

        sqlx::query(
            "INSERT INTO checkpoints (thread_id, step, node, status, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.thread_id)
        .bind(step)
        .bind(&checkpoint.node)
        .bind(checkpoint.status.as_str())
        .bind(&payload)
        .bind(timestamp(&checkpoint.ts))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            thread_id = %checkpoint.thread_id,
            step = checkpoint.step,
            status = %checkpoint.status,
            "Checkpoint committed"
        );
        Ok(checkpoint)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT payload FROM checkpoints WHERE thread_id = ? ORDER BY step DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.decode(&r)).transpose()
    }

    async fn get_step(&self, thread_id: &str, step: u64) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT payload FROM checkpoints WHERE thread_id = ? AND step = ?")
            .bind(thread_id)
            .bind(step_to_sql(step)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| self.decode(&r)).transpose()
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            "SELECT payload FROM checkpoints WHERE thread_id = ? ORDER BY step DESC LIMIT ?",
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let results: Vec<Result<Checkpoint>> = rows.iter().map(|r| self.decode(r)).collect();
        Ok(Box::pin(stream::iter(results)))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let rows = sqlx::query(
            "SELECT c.thread_id, c.step, c.status, c.created_at AS updated_at,
                    (SELECT MIN(f.created_at) FROM checkpoints f WHERE f.thread_id = c.thread_id) AS created_at
             FROM checkpoints c
             WHERE c.step = (SELECT MAX(m.step) FROM checkpoints m WHERE m.thread_id = c.thread_id)
             ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let created_at: String = row.try_get("created_at")?;
                let updated_at: String = row.try_get("updated_at")?;
                let step: i64 = row.try_get("step")?;

                Ok(ThreadInfo {
                    thread_id: row.try_get("thread_id")?,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    latest_step: step as u64,
                    status: status
                        .parse::<CheckpointStatus>()
                        .map_err(CheckpointError::Storage)?,
                })
            })
            .collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
