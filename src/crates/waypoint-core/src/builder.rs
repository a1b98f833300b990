//! Fluent builder for workflow graphs
//!
//! [`StateGraph`] collects nodes, edges and bounded loops, then
//! [`compile`](StateGraph::compile)s them into an immutable
//! [`CompiledGraph`]. All topology errors surface at compile time as
//! [`GraphError::Validation`].
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use serde_json::json;
//! use waypoint_core::{BoundedLoop, NodeOutput, StateDelta, StateGraph, END};
//!
//! let mut graph = StateGraph::new();
//! graph
//!     .add_node("intake", |_state| async move {
//!         Ok(NodeOutput::Update(StateDelta::new().with_field("ready", true)))
//!     })
//!     .add_node("work", |state| async move {
//!         let n = state.field_f64("score").unwrap_or(0.0);
//!         Ok(NodeOutput::Update(StateDelta::new().with_field("score", n + 1.0)))
//!     })
//!     .add_node("gate", |_state| async move { Ok(NodeOutput::Update(StateDelta::new())) })
//!     .add_node("finish", |state| async move {
//!         Ok(NodeOutput::Update(StateDelta::new().with_output(json!({"score": state.field("score")}))))
//!     })
//!     .set_entry("intake")
//!     .add_edge("intake", "work")
//!     .add_edge("work", "gate")
//!     .add_bounded_loop(
//!         BoundedLoop::new("attempts", 3)
//!             .body("work")
//!             .gate("gate")
//!             .exit_to("finish")
//!             .retry_when(|state| state.field_f64("score").unwrap_or(0.0) < 10.0),
//!     )
//!     .add_finish("finish");
//!
//! let compiled = graph.compile().expect("valid graph");
//! assert_eq!(compiled.entry(), "intake");
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bounded_loop::BoundedLoop;
use crate::error::{GraphError, Result};
use crate::graph::{CompiledGraph, Edge, Graph, RoutingDecision, END};
use crate::node::{agent_executor, executor_fn, Agent, NodeExecutor, NodeId, NodeResult, NodeSpec};
use crate::state::{Reducer, State};

/// Builder for a workflow graph
#[derive(Debug, Default)]
pub struct StateGraph {
    graph: Graph,
    /// Problems found while building, reported by compile()
    errors: Vec<String>,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node backed by an async closure
    pub fn add_node<F, Fut>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        let id = id.into();
        let spec = NodeSpec::new(id.clone(), executor_fn(executor));
        self.add_node_spec(id, spec)
    }

    /// Add a node backed by an [`Agent`]
    pub fn add_agent(&mut self, id: impl Into<NodeId>, agent: Arc<dyn Agent>) -> &mut Self {
        let id = id.into();
        let spec = NodeSpec::new(id.clone(), agent_executor(agent));
        self.add_node_spec(id, spec)
    }

    /// Add a node with a pre-built executor
    pub fn add_node_with_executor(&mut self, id: impl Into<NodeId>, executor: NodeExecutor) -> &mut Self {
        let id = id.into();
        let spec = NodeSpec::new(id.clone(), executor);
        self.add_node_spec(id, spec)
    }

    /// Add a fully specified node
    pub fn add_node_spec(&mut self, id: impl Into<NodeId>, spec: NodeSpec) -> &mut Self {
        let id = id.into();
        if id == END || id.is_empty() {
            self.errors.push(format!("'{}' is not a valid node name", id));
            return self;
        }
        if self.graph.nodes.contains_key(&id) {
            self.errors.push(format!("Node {} is defined twice", id));
            return self;
        }
        self.graph.add_node(id, spec);
        self
    }

    /// Unconditional edge
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph.add_edge(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Router-selected edge over a declared set of branches
    pub fn add_conditional_edge<F>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        branches: HashMap<String, NodeId>,
    ) -> &mut Self
    where
        F: Fn(&State) -> RoutingDecision + Send + Sync + 'static,
    {
        self.graph.add_edge(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                branches,
            },
        );
        self
    }

    /// Declare a bounded loop and wire its gate
    pub fn add_bounded_loop(&mut self, bounded: BoundedLoop) -> &mut Self {
        match bounded.gate.clone() {
            Some(gate) => self.graph.add_edge(gate, Edge::LoopGate(bounded.counter.clone())),
            None => self
                .errors
                .push(format!("Bounded loop {} has no gate node", bounded.counter)),
        }
        self.graph.loops.push(bounded);
        self
    }

    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.graph.set_entry(node.into());
        self
    }

    /// Add an edge from `node` to END
    pub fn add_finish(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.graph.add_edge(node.into(), Edge::Direct(END.to_string()));
        self
    }

    /// Merge rule for a state field (overwrite when undeclared)
    pub fn set_field_reducer(&mut self, field: impl Into<String>, reducer: Arc<dyn Reducer>) -> &mut Self {
        self.graph.schema.set_reducer(field, reducer);
        self
    }

    /// Time budget for one node's invocations
    pub fn set_node_timeout(&mut self, node: &str, timeout: Duration) -> &mut Self {
        match self.graph.nodes.get_mut(node) {
            Some(spec) => spec.timeout = Some(timeout),
            None => self
                .errors
                .push(format!("Cannot set timeout on unknown node {}", node)),
        }
        self
    }

    /// Validate and freeze the graph
    pub fn compile(self) -> Result<CompiledGraph> {
        if let Some(first) = self.errors.first() {
            return Err(GraphError::Validation(first.clone()));
        }

        let unreachable = self.graph.unreachable_nodes();
        let compiled = CompiledGraph::new(self.graph).map_err(GraphError::Validation)?;

        if !unreachable.is_empty() {
            warn!(nodes = ?unreachable, "Graph has nodes unreachable from the entry");
        }
        debug!(
            entry = compiled.entry(),
            nodes = compiled.node_names().len(),
            loops = compiled.loops().len(),
            "Graph compiled"
        );
        Ok(compiled)
    }
}
