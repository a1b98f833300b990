//! # waypoint-checkpoint - Durable Thread State for Workflow Execution
//!
//! **Append-only checkpoint storage** for waypoint workflow threads. Every node
//! execution in the engine ends with one committed checkpoint, which makes a
//! thread resumable after a suspension, a failure or a host restart.
//!
//! ## Overview
//!
//! A [`Checkpoint`] records, for one thread at one step:
//!
//! - the serialized workflow state
//! - the node that ran and the node to run next
//! - a [`CheckpointStatus`] (`ready`, `running`, `suspended`, `completed`, `failed`)
//! - optional pending-interrupt, error and output payloads
//!
//! Storage backends implement the [`CheckpointStore`] trait:
//!
//! - [`InMemoryCheckpointStore`] - process-local, for tests and short-lived hosts
//! - [`SqliteCheckpointStore`] - SQLite file via `sqlx`, survives restarts
//!
//! ## Guarantees
//!
//! - A checkpoint is committed only when `put` returns `Ok`.
//! - Steps are strictly increasing per thread; a stale or duplicate step is
//!   rejected with [`CheckpointError::Conflict`] and nothing is overwritten.
//! - Threads are independent; stores never lock across threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypoint_checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, SqliteCheckpointStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteCheckpointStore::open("data/checkpoints.db").await?;
//!
//!     store
//!         .put(Checkpoint::new("thread-1", 0, CheckpointStatus::Ready, json!({})).with_next("intent"))
//!         .await?;
//!
//!     if let Some(view) = store.get_state("thread-1").await? {
//!         println!("{} at step {}", view.status, view.step);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## See Also
//!
//! - `waypoint-core` - graph definition and the execution engine that writes these checkpoints

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointId, CheckpointStatus, StateView, ThreadInfo};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use sqlite::SqliteCheckpointStore;
pub use traits::{CheckpointStore, CheckpointStream};
