//! Extensible checkpoint storage trait for custom backend implementations
//!
//! This module defines the **[`CheckpointStore`]** trait - the abstraction every
//! persistence backend implements. The execution engine writes one checkpoint
//! after every node and reads the latest one to resume a thread, so any storage
//! system that can append and fetch-latest per key can back it.
//!
//! # Contract
//!
//! - **Append-only** - `put` adds a new version; existing versions are never
//!   rewritten. A `put` whose step is not strictly greater than the thread's
//!   latest step is rejected with [`CheckpointError::Conflict`].
//! - **Commit point** - a checkpoint is committed only once `put` returns `Ok`.
//!   The engine reports a step complete only after that.
//! - **Read-after-write** - for a single thread under serialized access,
//!   `get_latest` observes the most recent successful `put`.
//! - **No cross-thread locking** - backends must tolerate concurrent calls for
//!   different threads. Single-writer-per-thread is enforced above the store by
//!   the thread manager, not here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  waypoint-core Engine                                │
//! │  • run node                                          │
//! │  • merge delta, route                                │
//! │  • store.put(checkpoint)  ◄── commit point           │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ CheckpointStore trait
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!   ┌─────────────┐ ┌─────────────┐  ┌─────────────┐
//!   │  In-Memory  │ │   SQLite    │  │   Custom    │
//!   └─────────────┘ └─────────────┘  └─────────────┘
//! ```
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use waypoint_checkpoint::{Checkpoint, CheckpointStore, CheckpointStream, Result, ThreadInfo};
//! use async_trait::async_trait;
//!
//! struct RedisStore { /* ... */ }
//!
//! #[async_trait]
//! impl CheckpointStore for RedisStore {
//!     async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
//!         // ZADD checkpoints:{thread} NX {step} {json}
//!         todo!()
//!     }
//!
//!     async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
//!         // ZREVRANGE checkpoints:{thread} 0 0
//!         todo!()
//!     }
//!
//!     // get_step, list, list_threads, delete_thread ...
//! }
//! ```

use crate::checkpoint::{Checkpoint, StateView, ThreadInfo};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Stream of checkpoints, newest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<Checkpoint>> + Send>>;

/// Persistence backend for thread checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a new checkpoint version for its thread.
    ///
    /// Returns the committed checkpoint. Fails with
    /// [`CheckpointError::Conflict`](crate::CheckpointError::Conflict) when the
    /// step is not after the thread's latest step.
    async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint>;

    /// Fetch the most recent checkpoint of a thread, or `None` if unknown.
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Fetch a specific step of a thread.
    async fn get_step(&self, thread_id: &str, step: u64) -> Result<Option<Checkpoint>>;

    /// Stream a thread's checkpoints, newest first, optionally limited.
    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream>;

    /// Summaries of every stored thread, most recently updated first.
    async fn list_threads(&self) -> Result<Vec<ThreadInfo>>;

    /// Remove every checkpoint of a thread.
    ///
    /// Retention is a caller-side policy; the engine never calls this.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Read-only projection of the latest checkpoint's state.
    async fn get_state(&self, thread_id: &str) -> Result<Option<StateView>> {
        Ok(self.get_latest(thread_id).await?.map(|c| c.view()))
    }
}
