//! In-memory checkpoint storage for development and testing
//!
//! This module provides **[`InMemoryCheckpointStore`]** - a reference
//! implementation of [`CheckpointStore`] that keeps every checkpoint in a
//! thread-safe map. Data does not survive a restart; use
//! [`SqliteCheckpointStore`](crate::sqlite::SqliteCheckpointStore) when threads
//! must be resumable after the process exits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Arc<RwLock<HashMap<thread_id, Vec<_>>>>    │
//! │                                             │
//! │  "thread-1"                                 │
//! │    ├─ [0] step 0  ready                     │
//! │    ├─ [1] step 1  running                   │
//! │    └─ [2] step 2  suspended                 │
//! │                                             │
//! │  "thread-2"                                 │
//! │    ├─ [0] step 0  ready                     │
//! │    └─ [1] step 1  completed                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Entries within a thread are kept in step order, so the latest checkpoint is
//! always the last element.
//!
//! # Example
//!
//! ```rust
//! use waypoint_checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, InMemoryCheckpointStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let checkpoint = Checkpoint::new("thread-1", 0, CheckpointStatus::Ready, serde_json::json!({}));
//!     store.put(checkpoint).await?;
//!
//!     let latest = store.get_latest("thread-1").await?.expect("committed");
//!     assert_eq!(latest.step, 0);
//!     Ok(())
//! }
//! ```

use crate::{
    checkpoint::{Checkpoint, ThreadInfo},
    error::{CheckpointError, Result},
    traits::{CheckpointStore, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<Checkpoint>>>>;

/// In-memory checkpoint store implementation
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointStore {
    /// Create a new in-memory checkpoint store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(|v| v.len()).sum()
    }

    /// Clear all checkpoints
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        if checkpoint.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.thread_id.clone()).or_default();

        if let Some(latest) = entries.last() {
            if checkpoint.step <= latest.step {
                return Err(CheckpointError::conflict(
                    &checkpoint.thread_id,
                    checkpoint.step,
                    latest.step,
                ));
            }
        }

        entries.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|entries| entries.last().cloned()))
    }

    async fn get_step(&self, thread_id: &str, step: u64) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(thread_id)
            .and_then(|entries| entries.iter().find(|c| c.step == step).cloned()))
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let results: Vec<Result<Checkpoint>> = storage
            .get(thread_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .map(Ok)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let storage = self.storage.read().await;
        let mut threads: Vec<ThreadInfo> = storage
            .iter()
            .filter_map(|(thread_id, entries)| {
                let first = entries.first()?;
                let latest = entries.last()?;
                Some(ThreadInfo {
                    thread_id: thread_id.clone(),
                    created_at: first.ts,
                    updated_at: latest.ts,
                    latest_step: latest.step,
                    status: latest.status,
                })
            })
            .collect();

        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(thread_id);
        Ok(())
    }
}
