//! # waypoint-core - Checkpointed Workflow Graphs
//!
//! **Stateful, interruptible workflow execution** over a directed graph of
//! agent functions. Every executed node commits a checkpoint, so a thread can
//! pause for a question, survive a restart, and be resumed later.
//!
//! ## Overview
//!
//! - **Graph definition** - [`StateGraph`] builds nodes, direct and conditional
//!   edges, and [`BoundedLoop`]s, then compiles them into an immutable
//!   [`CompiledGraph`]. Unbounded cycles are rejected at build time.
//! - **Execution** - [`Engine`] runs one node at a time against a
//!   [`CheckpointStore`](waypoint_checkpoint::CheckpointStore) and returns a
//!   [`RunResult`] once the thread completes, suspends, or fails.
//! - **Interrupts** - nodes return an [`InterruptRequest`] to ask the caller
//!   for input; [`InterruptController`] validates the answer and re-runs the
//!   paused node.
//! - **Loops and retries** - [`BoundedLoop`] bounds graph-level retry cycles;
//!   [`RetryPolicy`] retries a single flaky node with backoff.
//! - **Threads** - [`ThreadManager`] is the caller surface: `submit`,
//!   `resume`, `inspect`, `recover`, `history`, with per-thread serialization.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► ThreadManager ──(per-thread lock, spawned task)──► Engine
//!                 │                                               │
//!                 │ inspect (no lock)                             │ invoke node
//!                 ▼                                               ▼
//!          CheckpointStore ◄──────── put(one checkpoint per step) ┘
//!          (memory | sqlite)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use waypoint_checkpoint::InMemoryCheckpointStore;
//! use waypoint_core::{Engine, NodeOutput, StateDelta, StateGraph, ThreadManager};
//!
//! #[tokio::main]
//! async fn main() -> waypoint_core::Result<()> {
//!     let mut graph = StateGraph::new();
//!     graph
//!         .add_node("answer", |state| async move {
//!             let query = state.input_str("query").unwrap_or_default().to_string();
//!             Ok(NodeOutput::Update(StateDelta::new().with_output(json!({"answer": query}))))
//!         })
//!         .set_entry("answer")
//!         .add_finish("answer");
//!
//!     let engine = Engine::new(graph.compile()?, Arc::new(InMemoryCheckpointStore::new()));
//!     let threads = ThreadManager::new(Arc::new(engine));
//!
//!     let result = threads.submit(None, json!({"query": "hello"})).await?;
//!     println!("{}: {:?}", result.thread_id, result.output());
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! All components emit `tracing` events (thread id, step, node). Install any
//! subscriber, e.g. `tracing_subscriber::fmt().with_env_filter("waypoint_core=debug")`.

pub mod bounded_loop;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod node;
pub mod retry;
pub mod session;
pub mod state;
pub mod visualization;

pub use bounded_loop::{BoundedLoop, LoopDecision, LoopPredicate};
pub use builder::StateGraph;
pub use config::{CheckpointBackend, EngineConfig, FromEnv, ValidateConfig};
pub use engine::{Engine, Outcome, RunResult};
pub use error::{ErrorDescriptor, ErrorKind, GraphError, Result};
pub use graph::{CompiledGraph, Edge, Graph, RouterFn, RoutingDecision, END, START};
pub use interrupt::{InterruptController, InterruptRequest, ResponseShape, ResumeTarget, CLARIFICATION_NEEDED};
pub use node::{agent_executor, executor_fn, Agent, NodeError, NodeExecutor, NodeId, NodeOutput, NodeResult, NodeSpec};
pub use retry::{with_retry, RetryPolicy};
pub use session::{ThreadManager, ThreadSnapshot};
pub use state::{
    AppendReducer, MergeReducer, OverwriteReducer, Reducer, Role, State, StateDelta, StateError, StateSchema, Turn,
};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};
