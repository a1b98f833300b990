//! Execution engine: runs a compiled graph one checkpointed step at a time
//!
//! The engine owns no thread state between calls. Every operation loads what
//! it needs from the [`CheckpointStore`], executes nodes, and commits one
//! checkpoint per executed node before moving on. Whatever was last committed
//! is the thread's truth.
//!
//! # Step loop
//!
//! ```text
//!   start(thread, input)
//!        │
//!        ▼
//!   put(step n, Ready, next = entry)
//!        │
//!        ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │  invoke node (bounded by node timeout)                   │
//!   │     │                                                    │
//!   │     ├─ Update(delta) ─► merge ─► bump loop counters      │
//!   │     │                     ─► evaluate edge               │
//!   │     │                     ─► put(Running, next) ─────────┼──► next node
//!   │     │                     ─► put(Completed, output) ─────┼──► return
//!   │     │                                                    │
//!   │     ├─ Interrupt(req) ─► put(Suspended, next = node) ────┼──► return
//!   │     │                                                    │
//!   │     └─ Err ─► put(Failed, descriptor) ───────────────────┼──► return
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A `put` that fails aborts the operation with
//! [`GraphError::Persistence`]; the thread stays at its previous checkpoint and
//! the same operation can be retried, or [`Engine::recover`] can pick the run up
//! from the last committed step.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use waypoint_checkpoint::InMemoryCheckpointStore;
//! use waypoint_core::{Engine, NodeOutput, Outcome, StateDelta, StateGraph};
//!
//! # async fn example() -> waypoint_core::Result<()> {
//! let mut graph = StateGraph::new();
//! graph
//!     .add_node("echo", |state| async move {
//!         Ok(NodeOutput::Update(StateDelta::new().with_output(state.input.clone())))
//!     })
//!     .set_entry("echo")
//!     .add_finish("echo");
//!
//! let engine = Engine::new(graph.compile()?, Arc::new(InMemoryCheckpointStore::new()));
//! let result = engine.start("thread-1", json!({"query": "hello"})).await?;
//! assert!(matches!(result.outcome, Outcome::Completed { .. }));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use waypoint_checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};

use crate::config::{EngineConfig, ValidateConfig};
use crate::error::{ErrorDescriptor, GraphError, Result};
use crate::graph::{CompiledGraph, Edge, END};
use crate::bounded_loop::LoopDecision;
use crate::interrupt::InterruptRequest;
use crate::node::{NodeError, NodeId, NodeOutput};
use crate::state::{State, Turn};

/// Where a thread came to rest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed { output: Value },
    Suspended { request: InterruptRequest },
    Failed { error: ErrorDescriptor },
}

/// Result of driving a thread to a resting state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub thread_id: String,
    /// Step of the checkpoint the thread rests at
    pub step: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RunResult {
    /// Rebuild the result recorded by a resting checkpoint.
    ///
    /// Returns `None` for `Ready` and `Running` checkpoints, which are not
    /// resting states.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Option<Self>> {
        let outcome = match checkpoint.status {
            CheckpointStatus::Completed => Outcome::Completed {
                output: checkpoint.output.clone().unwrap_or(Value::Null),
            },
            CheckpointStatus::Suspended => {
                let raw = checkpoint.interrupt.clone().ok_or_else(|| {
                    GraphError::Execution(format!(
                        "suspended checkpoint {} of thread {} has no interrupt",
                        checkpoint.step, checkpoint.thread_id
                    ))
                })?;
                Outcome::Suspended {
                    request: serde_json::from_value(raw)?,
                }
            }
            CheckpointStatus::Failed => {
                let error = match checkpoint.error.clone() {
                    Some(raw) => serde_json::from_value(raw)?,
                    None => GraphError::Execution("thread failed without a recorded error".to_string())
                        .descriptor(),
                };
                Outcome::Failed { error }
            }
            CheckpointStatus::Ready | CheckpointStatus::Running => return Ok(None),
        };
        Ok(Some(Self {
            thread_id: checkpoint.thread_id.clone(),
            step: checkpoint.step,
            outcome,
        }))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.outcome, Outcome::Suspended { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    pub fn interrupt(&self) -> Option<&InterruptRequest> {
        match &self.outcome {
            Outcome::Suspended { request } => Some(request),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Where a completed node sends the thread
struct Route {
    next: NodeId,
    metadata: Vec<(&'static str, Value)>,
}

/// Runs a compiled graph against a checkpoint store
pub struct Engine {
    graph: CompiledGraph,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(graph: CompiledGraph, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            graph,
            store,
            config: EngineConfig::default(),
        }
    }

    /// Engine with explicit tunables
    pub fn with_config(graph: CompiledGraph, store: Arc<dyn CheckpointStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { graph, store, config })
    }

    /// Engine whose store is opened from `config.checkpoint`
    pub async fn from_config(graph: CompiledGraph, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = config.open_store().await?;
        Ok(Self { graph, store, config })
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Latest committed checkpoint of a thread
    pub async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.store.get_latest(thread_id).await?)
    }

    /// Begin a run of the graph on a thread.
    ///
    /// A new thread starts from fresh state. An existing thread keeps its
    /// history: the input is replaced and recorded as a user turn, the previous
    /// output and any loop counters are cleared, and a pending interrupt is
    /// abandoned.
    #[instrument(skip(self, input))]
    pub async fn start(&self, thread_id: &str, input: Value) -> Result<RunResult> {
        let (step, mut state) = match self.latest(thread_id).await? {
            None => (0, State::new(input)),
            Some(latest) => {
                if latest.status == CheckpointStatus::Suspended {
                    info!(step = latest.step, "New run abandons pending interrupt");
                }
                let mut state = State::from_value(latest.state)?;
                state.input = input;
                state.output = None;
                state.counters.clear();
                (latest.step + 1, state)
            }
        };
        state.turns.push(Turn::user_input(&state.input));

        let entry = self.graph.entry().to_string();
        let checkpoint = Checkpoint::new(thread_id, step, CheckpointStatus::Ready, state.to_value()?)
            .with_next(entry.clone());
        self.commit(checkpoint).await?;
        info!(step, entry = %entry, "Run started");

        self.drive(thread_id, state, entry, step).await
    }

    /// Continue an in-progress (`Ready` or `Running`) checkpoint from its `next` node
    pub async fn continue_from(&self, checkpoint: Checkpoint) -> Result<RunResult> {
        if !checkpoint.status.is_in_progress() {
            return Err(GraphError::Execution(format!(
                "thread {} is {}, not in progress",
                checkpoint.thread_id, checkpoint.status
            )));
        }
        let next = checkpoint.next.clone().ok_or_else(|| {
            GraphError::Execution(format!(
                "checkpoint {} of thread {} has no next node",
                checkpoint.step, checkpoint.thread_id
            ))
        })?;
        let state = State::from_value(checkpoint.state)?;
        debug!(thread_id = %checkpoint.thread_id, step = checkpoint.step, next = %next, "Continuing run");
        self.drive(&checkpoint.thread_id, state, next, checkpoint.step).await
    }

    /// Answer the interrupt recorded by a `Suspended` checkpoint and re-run the paused node.
    ///
    /// Nothing is written when the response is rejected.
    #[instrument(skip(self, checkpoint, response), fields(thread_id = %checkpoint.thread_id))]
    pub async fn resume_from(&self, checkpoint: Checkpoint, response: Value) -> Result<RunResult> {
        let thread_id = checkpoint.thread_id.clone();
        if checkpoint.status != CheckpointStatus::Suspended {
            return Err(GraphError::invalid_resume(
                &thread_id,
                format!("thread is {}, not suspended", checkpoint.status),
            ));
        }

        let raw = checkpoint
            .interrupt
            .clone()
            .ok_or_else(|| GraphError::invalid_resume(&thread_id, "no pending interrupt"))?;
        let request: InterruptRequest = serde_json::from_value(raw)?;

        if let Err(reason) = request.validate_response(&response) {
            warn!(interrupt_id = %request.id, reason = %reason, "Resume response rejected");
            return Err(GraphError::invalid_resume(&thread_id, reason));
        }

        let node = match checkpoint.next.clone() {
            Some(next) => next,
            None if !request.node.is_empty() => request.node.clone(),
            None => return Err(GraphError::invalid_resume(&thread_id, "no node to resume at")),
        };

        let mut state = State::from_value(checkpoint.state)?;
        request.inject(&mut state, response);
        info!(node = %node, interrupt_id = %request.id, "Interrupt answered");

        self.drive(&thread_id, state, node, checkpoint.step).await
    }

    /// Bring a thread back to a resting state after a crash or a failed commit.
    ///
    /// In-progress threads continue from their recorded `next` node; resting
    /// threads are reported as they are without running anything.
    pub async fn recover(&self, thread_id: &str) -> Result<RunResult> {
        let latest = self
            .latest(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        match RunResult::from_checkpoint(&latest)? {
            Some(result) => Ok(result),
            None => {
                info!(thread_id, step = latest.step, status = %latest.status, "Recovering in-progress thread");
                self.continue_from(latest).await
            }
        }
    }

    /// Persist an interrupt raised from outside a node.
    ///
    /// The request is bound to its `node`, or to the thread's pending `next`
    /// node when unset.
    pub(crate) async fn suspend(&self, thread_id: &str, mut request: InterruptRequest) -> Result<InterruptRequest> {
        let latest = self
            .latest(thread_id)
            .await?
            .ok_or_else(|| GraphError::ThreadNotFound(thread_id.to_string()))?;

        if request.node.is_empty() {
            request.node = latest.next.clone().ok_or_else(|| {
                GraphError::Execution(format!(
                    "thread {} has no pending node to suspend at",
                    thread_id
                ))
            })?;
        }
        if !self.graph.contains(&request.node) {
            return Err(GraphError::Execution(format!(
                "cannot suspend at unknown node {}",
                request.node
            )));
        }

        let checkpoint = Checkpoint::new(thread_id, latest.step + 1, CheckpointStatus::Suspended, latest.state)
            .with_next(request.node.clone())
            .with_interrupt(serde_json::to_value(&request)?);
        self.commit(checkpoint).await?;
        info!(thread_id, node = %request.node, kind = %request.kind, "Thread suspended");
        Ok(request)
    }

    /// Execute nodes from `current` until the thread comes to rest.
    ///
    /// `step` is the last committed step of the thread.
    async fn drive(&self, thread_id: &str, mut state: State, mut current: NodeId, mut step: u64) -> Result<RunResult> {
        let max_steps = self.config.max_steps;
        let mut executed = 0usize;

        loop {
            if executed >= max_steps {
                error!(thread_id, limit = max_steps, node = %current, "Step limit exceeded");
                let err = GraphError::StepLimitExceeded { limit: max_steps };
                return self.fail(thread_id, step + 1, &current, &state, err).await;
            }
            executed += 1;

            let spec = self.graph.node(&current).ok_or_else(|| {
                GraphError::Execution(format!("node {} is not part of this graph", current))
            })?;

            debug!(thread_id, node = %current, step = step + 1, "Executing node");
            let invocation = (spec.executor)(state.clone());
            let result = match spec.timeout.or(self.config.node_timeout) {
                Some(limit) => match tokio::time::timeout(limit, invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout(limit)),
                },
                None => invocation.await,
            };
            let this_step = step + 1;

            match result {
                Ok(NodeOutput::Update(delta)) => {
                    if let Err(err) = self.graph.schema().apply(&mut state, delta) {
                        return self.fail(thread_id, this_step, &current, &state, err.into()).await;
                    }
                    for body_of in self.graph.loops_with_body(&current) {
                        let pass = state.increment_counter(&body_of.counter);
                        debug!(thread_id, counter = %body_of.counter, pass, "Loop pass recorded");
                    }

                    let route = match self.route(&current, &mut state) {
                        Ok(route) => route,
                        Err(err) => return self.fail(thread_id, this_step, &current, &state, err).await,
                    };

                    let mut checkpoint = if route.next == END {
                        let output = state.output.clone().unwrap_or(Value::Null);
                        Checkpoint::new(thread_id, this_step, CheckpointStatus::Completed, state.to_value()?)
                            .with_node(current.clone())
                            .with_output(output)
                    } else {
                        Checkpoint::new(thread_id, this_step, CheckpointStatus::Running, state.to_value()?)
                            .with_node(current.clone())
                            .with_next(route.next.clone())
                    };
                    for (key, value) in route.metadata {
                        checkpoint = checkpoint.with_metadata(key, value);
                    }

                    let committed = self.commit(checkpoint).await?;
                    step = this_step;

                    if route.next == END {
                        info!(thread_id, step, "Run completed");
                        return Ok(RunResult {
                            thread_id: thread_id.to_string(),
                            step,
                            outcome: Outcome::Completed {
                                output: committed.output.unwrap_or(Value::Null),
                            },
                        });
                    }
                    current = route.next;
                }
                Ok(NodeOutput::Interrupt(mut request)) => {
                    request.node = current.clone();
                    let checkpoint = Checkpoint::new(thread_id, this_step, CheckpointStatus::Suspended, state.to_value()?)
                        .with_node(current.clone())
                        .with_next(current.clone())
                        .with_interrupt(serde_json::to_value(&request)?);
                    self.commit(checkpoint).await?;

                    info!(thread_id, step = this_step, node = %current, kind = %request.kind, "Run suspended");
                    return Ok(RunResult {
                        thread_id: thread_id.to_string(),
                        step: this_step,
                        outcome: Outcome::Suspended { request },
                    });
                }
                Err(node_error) => {
                    let err = match node_error {
                        NodeError::Timeout(limit) => GraphError::Timeout {
                            node: current.clone(),
                            duration_ms: limit.as_millis() as u64,
                        },
                        other => GraphError::node_execution(current.clone(), other.to_string()),
                    };
                    return self.fail(thread_id, this_step, &current, &state, err).await;
                }
            }
        }
    }

    /// Evaluate the outgoing edge of a node that just completed
    fn route(&self, node: &str, state: &mut State) -> Result<Route> {
        let edge = self
            .graph
            .edge(node)
            .ok_or_else(|| GraphError::Execution(format!("node {} has no outgoing edge", node)))?;

        match edge {
            Edge::Direct(to) => Ok(Route {
                next: to.clone(),
                metadata: Vec::new(),
            }),
            Edge::Conditional { router, branches } => {
                let decision = router(state);
                match branches.get(decision.key()) {
                    Some(to) => Ok(Route {
                        next: to.clone(),
                        metadata: vec![("route", Value::String(decision.key().to_string()))],
                    }),
                    None => Err(GraphError::undeclared_route(node, decision.key())),
                }
            }
            Edge::LoopGate(counter) => {
                let bounded = self.graph.bounded_loop(counter).ok_or_else(|| {
                    GraphError::Execution(format!("loop {} is not declared", counter))
                })?;

                match bounded.decide(state) {
                    LoopDecision::Retry { target, pass } => {
                        debug!(counter = %counter, pass, target = %target, "Loop retry");
                        Ok(Route {
                            next: target,
                            metadata: vec![
                                ("loop", Value::String(counter.clone())),
                                ("loop_pass", Value::from(pass)),
                            ],
                        })
                    }
                    LoopDecision::Exit { target, exhausted } => {
                        let passes = state.clear_counter(counter).unwrap_or(0);
                        if exhausted {
                            warn!(counter = %counter, passes, max = bounded.max, "Loop exhausted, proceeding with best effort");
                        } else {
                            debug!(counter = %counter, passes, "Loop exited");
                        }
                        Ok(Route {
                            next: target,
                            metadata: vec![
                                ("loop", Value::String(counter.clone())),
                                ("loop_exhausted", Value::Bool(exhausted)),
                            ],
                        })
                    }
                }
            }
        }
    }

    /// Append one checkpoint; on failure the thread stays at its previous one
    async fn commit(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        let (thread_id, step) = (checkpoint.thread_id.clone(), checkpoint.step);
        self.store.put(checkpoint).await.map_err(|err| {
            warn!(thread_id = %thread_id, step, transient = err.is_transient(), error = %err, "Checkpoint commit failed");
            GraphError::Persistence(err)
        })
    }

    /// Commit a `Failed` checkpoint for `err` and report it
    async fn fail(&self, thread_id: &str, step: u64, node: &str, state: &State, err: GraphError) -> Result<RunResult> {
        let mut descriptor = err.descriptor();
        if descriptor.node.is_none() {
            descriptor.node = Some(node.to_string());
        }
        error!(thread_id, step, node, kind = ?descriptor.kind, error = %descriptor, "Run failed");

        let checkpoint = Checkpoint::new(thread_id, step, CheckpointStatus::Failed, state.to_value()?)
            .with_node(node.to_string())
            .with_error(serde_json::to_value(&descriptor)?);
        self.commit(checkpoint).await?;

        Ok(RunResult {
            thread_id: thread_id.to_string(),
            step,
            outcome: Outcome::Failed { error: descriptor },
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("entry", &self.graph.entry())
            .field("store", &"<checkpoint store>")
            .field("config", &self.config)
            .finish()
    }
}
