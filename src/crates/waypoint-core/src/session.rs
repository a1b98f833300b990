//! Thread manager: the caller-facing surface
//!
//! [`ThreadManager`] maps thread ids to their checkpoint history and
//! serializes the operations that advance a thread. Distinct threads run in
//! parallel; operations on the same thread queue behind a per-thread lock.
//!
//! ```text
//!   submit("a") ─┐                        ┌─► task(lock a) ─► engine ─┐
//!   resume("a") ─┼─► locks: DashMap ──────┤   (waits for lock a)      ├─► store
//!   submit("b") ─┘                        └─► task(lock b) ─► engine ─┘
//!
//!   suspend("a") ─► (same queue as submit and resume)
//!   inspect("a") ─────────────────────────────────────────► store (no lock)
//! ```
//!
//! Each locked operation runs on its own tokio task, so it finishes and
//! releases the lock even if the caller stops waiting. Lock entries are
//! dropped again once no operation holds or awaits them.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use waypoint_checkpoint::{Checkpoint, CheckpointStatus, ThreadInfo};

use crate::engine::{Engine, RunResult};
use crate::error::{ErrorDescriptor, GraphError, Result};
use crate::interrupt::{InterruptController, InterruptRequest};
use crate::state::{render_value, Role, State};

type ThreadLock = Arc<Mutex<()>>;

/// Read-only view of a thread's latest checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub step: u64,
    pub status: CheckpointStatus,
    pub state: State,
    pub next: Option<String>,
    pub pending_interrupt: Option<InterruptRequest>,
    pub error: Option<ErrorDescriptor>,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serialized, concurrent access to workflow threads
#[derive(Clone)]
pub struct ThreadManager {
    engine: Arc<Engine>,
    interrupts: InterruptController,
    locks: Arc<DashMap<String, ThreadLock>>,
}

impl ThreadManager {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            interrupts: InterruptController::new(Arc::clone(&engine)),
            engine,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Threads with an operation running or queued
    pub fn active_threads(&self) -> usize {
        self.locks.len()
    }

    /// Run the graph on a thread.
    ///
    /// Without an id a new thread is created. An unknown id creates that
    /// thread; a known one starts a new run with `input`. Submitting the same
    /// input again while the thread is still in progress (for example after a
    /// [`GraphError::Persistence`]) continues that run instead of starting over.
    pub async fn submit(&self, thread_id: Option<String>, input: Value) -> Result<RunResult> {
        let thread_id = thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if thread_id.is_empty() {
            return Err(GraphError::Validation("thread id must not be empty".to_string()));
        }

        self.exclusive(thread_id, move |manager, thread_id| async move {
            if let Some(latest) = manager.engine.latest(&thread_id).await? {
                if latest.status.is_in_progress() && latest.state.get("input") == Some(&input) {
                    info!(thread_id = %thread_id, step = latest.step, "Resubmitted input continues in-progress run");
                    return manager.engine.continue_from(latest).await;
                }
            }
            manager.engine.start(&thread_id, input).await
        })
        .await
    }

    /// Answer the pending interrupt of a suspended thread.
    ///
    /// Repeating a resume whose run was cut short by a failed commit continues
    /// that run instead of being rejected.
    pub async fn resume(&self, thread_id: &str, response: Value) -> Result<RunResult> {
        self.exclusive(thread_id.to_string(), move |manager, thread_id| async move {
            if let Some(latest) = manager.engine.latest(&thread_id).await? {
                if latest.status.is_in_progress() && answered_with(&latest, &response)? {
                    info!(thread_id = %thread_id, step = latest.step, "Repeated resume continues in-progress run");
                    return manager.engine.continue_from(latest).await;
                }
            }
            manager.interrupts.resume(&thread_id, response).await
        })
        .await
    }

    /// Suspend a thread on a request raised from outside the graph.
    ///
    /// Queues behind any run in flight on the thread, so the request is
    /// written after that run's last checkpoint.
    pub async fn suspend(&self, thread_id: &str, request: InterruptRequest) -> Result<InterruptRequest> {
        self.exclusive(thread_id.to_string(), move |manager, thread_id| async move {
            manager.interrupts.suspend(&thread_id, request).await
        })
        .await
    }

    /// Pending request of a suspended thread, if any
    pub async fn pending(&self, thread_id: &str) -> Result<Option<InterruptRequest>> {
        self.interrupts.pending(thread_id).await
    }

    /// Continue a thread left in progress by a crash or a failed commit
    pub async fn recover(&self, thread_id: &str) -> Result<RunResult> {
        self.exclusive(thread_id.to_string(), |manager, thread_id| async move {
            manager.engine.recover(&thread_id).await
        })
        .await
    }

    /// Snapshot of the latest checkpoint; never blocks on or alters the thread
    pub async fn inspect(&self, thread_id: &str) -> Result<ThreadSnapshot> {
        let latest = self
            .engine
            .latest(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        let created_at = match self.engine.store().get_step(thread_id, 0).await? {
            Some(first) => first.ts,
            None => latest.ts,
        };
        snapshot(latest, created_at)
    }

    /// Checkpoints of a thread, newest first
    pub async fn history(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let checkpoints: Vec<Checkpoint> = self
            .engine
            .store()
            .list(thread_id, limit)
            .await?
            .try_collect()
            .await?;
        if checkpoints.is_empty() {
            return Err(GraphError::ThreadNotFound(thread_id.to_string()));
        }
        Ok(checkpoints)
    }

    /// Every known thread, most recently updated first
    pub async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        Ok(self.engine.store().list_threads().await?)
    }

    fn lock_for(&self, thread_id: &str) -> ThreadLock {
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry unless another operation still holds a handle
    fn release(&self, thread_id: &str) {
        self.locks
            .remove_if(thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Run `op` on its own task while holding the thread's lock
    async fn exclusive<F, Fut, T>(&self, thread_id: String, op: F) -> Result<T>
    where
        F: FnOnce(ThreadManager, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let lock = manager.lock_for(&thread_id);
            let result = {
                let _guard = lock.lock().await;
                debug!(thread_id = %thread_id, "Thread lock acquired");
                op(manager.clone(), thread_id.clone()).await
            };
            drop(lock);
            manager.release(&thread_id);
            result
        });

        task.await
            .map_err(|e| GraphError::Execution(format!("thread task failed: {}", e)))?
    }
}

/// Whether the thread's latest user turn is this response to an interrupt
fn answered_with(latest: &Checkpoint, response: &Value) -> Result<bool> {
    let state = State::from_value(latest.state.clone())?;
    let answer = state.turns.iter().rev().find(|turn| turn.role == Role::User);
    Ok(matches!(
        answer,
        Some(turn) if turn.metadata.contains_key("interrupt_id") && turn.content == render_value(response)
    ))
}

fn snapshot(latest: Checkpoint, created_at: DateTime<Utc>) -> Result<ThreadSnapshot> {
    let pending_interrupt = match (&latest.status, &latest.interrupt) {
        (CheckpointStatus::Suspended, Some(raw)) => Some(serde_json::from_value(raw.clone())?),
        _ => None,
    };
    let error = latest.error.clone().map(serde_json::from_value).transpose()?;

    Ok(ThreadSnapshot {
        thread_id: latest.thread_id,
        step: latest.step,
        status: latest.status,
        state: State::from_value(latest.state)?,
        next: latest.next,
        pending_interrupt,
        error,
        output: latest.output,
        created_at,
        updated_at: latest.ts,
    })
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("engine", &self.engine)
            .field("active_threads", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::node::NodeOutput;
    use crate::state::StateDelta;
    use serde_json::json;
    use waypoint_checkpoint::InMemoryCheckpointStore;

    fn manager() -> ThreadManager {
        let mut graph = StateGraph::new();
        graph
            .add_node("reply", |state| async move {
                let query = state.input_str("query").unwrap_or_default().to_string();
                Ok(NodeOutput::Update(
                    StateDelta::new().with_output(json!({"echo": query})),
                ))
            })
            .set_entry("reply")
            .add_finish("reply");
        let engine = Engine::new(graph.compile().unwrap(), Arc::new(InMemoryCheckpointStore::new()));
        ThreadManager::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_submit_without_id_creates_thread() {
        let manager = manager();
        let result = manager.submit(None, json!({"query": "hi"})).await.unwrap();

        assert!(Uuid::parse_str(&result.thread_id).is_ok());
        assert_eq!(result.output(), Some(&json!({"echo": "hi"})));
        assert_eq!(manager.list_threads().await.unwrap().len(), 1);
        assert_eq!(manager.active_threads(), 0);
    }

    #[tokio::test]
    async fn test_submit_to_existing_thread_starts_new_run() {
        let manager = manager();
        manager.submit(Some("t".into()), json!({"query": "one"})).await.unwrap();
        let second = manager.submit(Some("t".into()), json!({"query": "two"})).await.unwrap();

        assert_eq!(second.output(), Some(&json!({"echo": "two"})));
        let snapshot = manager.inspect("t").await.unwrap();
        assert_eq!(snapshot.state.turns.len(), 2);
        assert_eq!(snapshot.status, CheckpointStatus::Completed);
        assert!(snapshot.created_at <= snapshot.updated_at);
    }

    #[tokio::test]
    async fn test_empty_thread_id_rejected() {
        let manager = manager();
        let err = manager.submit(Some(String::new()), json!("x")).await.unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_thread_reads() {
        let manager = manager();
        assert!(matches!(manager.inspect("ghost").await, Err(GraphError::ThreadNotFound(_))));
        assert!(matches!(manager.history("ghost", None).await, Err(GraphError::ThreadNotFound(_))));
        assert!(matches!(manager.recover("ghost").await, Err(GraphError::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn test_history_limit() {
        let manager = manager();
        manager.submit(Some("t".into()), json!({"query": "a"})).await.unwrap();

        let all = manager.history("t", None).await.unwrap();
        assert_eq!(all.len(), 2);
        let newest = manager.history("t", Some(1)).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].status, CheckpointStatus::Completed);
    }
}
