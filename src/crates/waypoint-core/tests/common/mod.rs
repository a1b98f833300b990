//! Shared fixtures for waypoint-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use waypoint_checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, CheckpointStream, InMemoryCheckpointStore, ThreadInfo,
};
use waypoint_core::{
    BoundedLoop, CompiledGraph, Engine, InterruptRequest, NodeOutput, StateDelta, StateGraph, ThreadManager, Turn,
};

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory store whose n-th `put` (1-indexed) fails once
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryCheckpointStore,
    puts: Arc<AtomicUsize>,
    fail_on: Arc<AtomicUsize>,
    tripped: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn failing_on(put_number: usize) -> Self {
        let store = Self::default();
        store.fail_on.store(put_number, Ordering::SeqCst);
        store
    }

    /// Arm the store to fail the n-th put counted from now
    pub fn fail_next(&self, nth: usize) {
        let seen = self.puts.load(Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
        self.fail_on.store(seen + nth, Ordering::SeqCst);
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<Checkpoint, CheckpointError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on.load(Ordering::SeqCst) && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(CheckpointError::Storage("disk unavailable".to_string()));
        }
        self.inner.put(checkpoint).await
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.get_latest(thread_id).await
    }

    async fn get_step(&self, thread_id: &str, step: u64) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.get_step(thread_id, step).await
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<CheckpointStream, CheckpointError> {
        self.inner.list(thread_id, limit).await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>, CheckpointError> {
        self.inner.list_threads().await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.inner.delete_thread(thread_id).await
    }
}

/// Oldest-first checkpoint history of a thread
pub async fn history(store: &dyn CheckpointStore, thread_id: &str) -> Vec<Checkpoint> {
    let mut checkpoints: Vec<Checkpoint> = store
        .list(thread_id, None)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    checkpoints.reverse();
    checkpoints
}

/// Nodes recorded by a thread's checkpoints, oldest first
pub async fn visited(store: &dyn CheckpointStore, thread_id: &str) -> Vec<String> {
    history(store, thread_id)
        .await
        .into_iter()
        .filter_map(|c| c.node)
        .collect()
}

/// `intake → work → gate → finish` with a loop of `max` passes over `work`.
///
/// `work` bumps `score` by one; the gate wants another pass while
/// `score < target`.
pub fn scored_loop_graph(max: u32, target: f64) -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph
        .add_node("intake", |_state| async {
            Ok(NodeOutput::Update(StateDelta::new().with_field("score", 0.0)))
        })
        .add_node("work", |state| async move {
            let score = state.field_f64("score").unwrap_or(0.0) + 1.0;
            Ok(NodeOutput::Update(
                StateDelta::new()
                    .with_field("score", score)
                    .push_turn(Turn::assistant(format!("pass scored {}", score)).from_node("work")),
            ))
        })
        .add_node("gate", |_state| async { Ok(NodeOutput::Update(StateDelta::new())) })
        .add_node("finish", |state| async move {
            let passes = state
                .turns
                .iter()
                .filter(|turn| turn.node.as_deref() == Some("work"))
                .count();
            Ok(NodeOutput::Update(
                StateDelta::new().with_output(json!({"passes": passes, "score": state.field("score")})),
            ))
        })
        .set_entry("intake")
        .add_edge("intake", "work")
        .add_edge("work", "gate")
        .add_bounded_loop(
            BoundedLoop::new("attempts", max)
                .body("work")
                .gate("gate")
                .exit_to("finish")
                .retry_when(move |state| state.field_f64("score").unwrap_or(0.0) < target),
        )
        .add_finish("finish");
    graph.compile().unwrap()
}

/// `intake` asks for `company` until the input carries it, then `lookup` answers.
pub fn clarification_graph() -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph
        .add_node("intake", |state| async move {
            match state.input_str("company") {
                Some(company) => Ok(NodeOutput::Update(StateDelta::new().with_field("company", company))),
                None => Ok(NodeOutput::Interrupt(
                    InterruptRequest::clarification("Which company do you mean?")
                        .require_key("company")
                        .with_context(json!({"missing": ["company"]})),
                )),
            }
        })
        .add_node("lookup", |state| async move {
            let company = state.field_str("company").unwrap_or_default().to_string();
            Ok(NodeOutput::Update(
                StateDelta::new()
                    .push_turn(Turn::assistant(format!("Report on {}", company)))
                    .with_output(json!({"company": company})),
            ))
        })
        .set_entry("intake")
        .add_edge("intake", "lookup")
        .add_finish("lookup");
    graph.compile().unwrap()
}

/// Single-node graph that echoes the input's `query`
pub fn echo_graph() -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph
        .add_node("echo", |state| async move {
            let query = state.input.get("query").cloned().unwrap_or(Value::Null);
            Ok(NodeOutput::Update(StateDelta::new().with_output(json!({"echo": query}))))
        })
        .set_entry("echo")
        .add_finish("echo");
    graph.compile().unwrap()
}

pub fn manager_with(graph: CompiledGraph, store: Arc<dyn CheckpointStore>) -> ThreadManager {
    ThreadManager::new(Arc::new(Engine::new(graph, store)))
}
