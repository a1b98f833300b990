//! Graph topology: nodes, edges, bounded loops and their validation
//!
//! A [`Graph`] is assembled by [`StateGraph`](crate::builder::StateGraph) and
//! frozen into a [`CompiledGraph`] once [`Graph::validate`] accepts it. The
//! topology never changes after that.
//!
//! # Structure
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Graph                           │
//! │                                                        │
//! │   entry                                                │
//! │     │                                                  │
//! │     ▼                                                  │
//! │  ┌────────┐  Direct   ┌────────┐                       │
//! │  │ intake │──────────►│  work  │◄───────────┐          │
//! │  └────────┘           └────────┘            │ retry    │
//! │                           │ Direct          │          │
//! │                           ▼                 │          │
//! │                       ┌────────┐  LoopGate  │          │
//! │                       │  gate  │────────────┘          │
//! │                       └────────┘                       │
//! │                           │ exit                       │
//! │                           ▼                            │
//! │                       ┌────────┐  Direct               │
//! │                       │ finish │──────────► END        │
//! │                       └────────┘                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Every node has exactly one outgoing edge:
//!
//! - [`Edge::Direct`] - always proceed to a fixed node (or [`END`])
//! - [`Edge::Conditional`] - a pure router picks one of a declared set of branches
//! - [`Edge::LoopGate`] - the node gates a [`BoundedLoop`]
//!
//! # Validation
//!
//! [`Graph::validate`] rejects, at build time:
//!
//! 1. a missing or unknown entry node
//! 2. edges whose source or target does not exist
//! 3. nodes with zero or several outgoing edges
//! 4. graphs where nothing reaches [`END`]
//! 5. conditional edges without branches
//! 6. malformed bounded loops (see [`Graph::validate`])
//! 7. any cycle other than a bounded loop's back-edge
//!
//! A router returning a key outside its declared branches cannot be caught
//! statically; the engine fails the thread with
//! [`GraphError::UndeclaredRoute`](crate::error::GraphError::UndeclaredRoute)
//! instead of guessing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::bounded_loop::BoundedLoop;
use crate::node::{NodeId, NodeSpec};
use crate::state::{State, StateSchema};
use crate::visualization::{visualize, VisualizationFormat, VisualizationOptions};

/// Marker for the graph's entry, used in diagrams
pub const START: &str = "__start__";

/// Terminal marker; an edge to `END` completes the run
pub const END: &str = "__end__";

/// Branch key chosen by a router
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingDecision(String);

impl RoutingDecision {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoutingDecision {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RoutingDecision {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Pure function from state to a branch key
pub type RouterFn = Arc<dyn Fn(&State) -> RoutingDecision + Send + Sync>;

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional edge to a node or [`END`]
    Direct(NodeId),

    /// Router-selected edge
    Conditional {
        router: RouterFn,
        /// Branch key to target node
        branches: HashMap<String, NodeId>,
    },

    /// The node gates the bounded loop with this counter
    LoopGate(String),
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
            Edge::LoopGate(counter) => f.debug_tuple("LoopGate").field(counter).finish(),
        }
    }
}

/// Mutable graph description, validated before use
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: HashMap<NodeId, NodeSpec>,
    /// Outgoing edges by source; a valid graph has exactly one per node
    pub edges: HashMap<NodeId, Vec<Edge>>,
    pub entry: Option<NodeId>,
    pub loops: Vec<BoundedLoop>,
    pub schema: StateSchema,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, spec: NodeSpec) {
        self.nodes.insert(id, spec);
    }

    pub fn add_edge(&mut self, from: NodeId, edge: Edge) {
        self.edges.entry(from).or_default().push(edge);
    }

    pub fn set_entry(&mut self, node: NodeId) {
        self.entry = Some(node);
    }

    fn exists(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    fn target_exists(&self, node: &str) -> bool {
        node == END || self.exists(node)
    }

    fn loop_named(&self, counter: &str) -> Option<&BoundedLoop> {
        self.loops.iter().find(|l| l.counter == counter)
    }

    /// Every possible successor of a node, `END` included
    fn successors(&self, node: &str, include_back_edges: bool) -> Vec<&str> {
        let mut out = Vec::new();
        for edge in self.edges.get(node).into_iter().flatten() {
            match edge {
                Edge::Direct(to) => out.push(to.as_str()),
                Edge::Conditional { branches, .. } => {
                    out.extend(branches.values().map(String::as_str))
                }
                Edge::LoopGate(counter) => {
                    if let Some(guard) = self.loop_named(counter) {
                        if let Some(exit) = guard.exit_to.as_deref() {
                            out.push(exit);
                        }
                        if include_back_edges {
                            if let Some(retry) = guard.retry_target() {
                                out.push(retry);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn reachable_from(&self, start: &str) -> HashSet<String> {
        self.reachable_avoiding(start, None)
    }

    /// Nodes reachable from `start` along paths that never enter `avoid`
    fn reachable_avoiding(&self, start: &str, avoid: Option<&str>) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.to_string()];
        while let Some(node) = stack.pop() {
            if Some(node.as_str()) == avoid || !seen.insert(node.clone()) {
                continue;
            }
            for next in self.successors(&node, true) {
                if next != END && !seen.contains(next) {
                    stack.push(next.to_string());
                }
            }
        }
        seen
    }

    /// Validate the topology.
    ///
    /// Bounded loops must allow at least one pass, name existing body, gate,
    /// retry and exit nodes, use unique counters, and be shaped so that the
    /// body is reachable from the retry target and the gate from the body.
    /// Every path from the retry target back to the gate must pass through the
    /// body, otherwise the counter would never advance.
    pub fn validate(&self) -> Result<(), String> {
        // 1. entry
        let entry = self.entry.as_deref().ok_or("Graph has no entry node")?;
        if !self.exists(entry) {
            return Err(format!("Entry point {} does not exist", entry));
        }

        // 6. loop parameters (before edges, which refer to loops)
        let mut counters = HashSet::new();
        for guard in &self.loops {
            guard.check()?;
            if !counters.insert(guard.counter.as_str()) {
                return Err(format!("Loop counter {} is declared twice", guard.counter));
            }
            let roles = [
                ("body", guard.body.as_deref()),
                ("gate", guard.gate.as_deref()),
                ("retry", guard.retry_target()),
            ];
            for (role, node) in roles {
                match node {
                    Some(node) if self.exists(node) => {}
                    Some(node) => {
                        return Err(format!(
                            "Loop {} {} node {} does not exist",
                            guard.counter, role, node
                        ))
                    }
                    None => return Err(format!("Loop {} has no {} node", guard.counter, role)),
                }
            }
            if let Some(exit) = guard.exit_to.as_deref() {
                if !self.target_exists(exit) {
                    return Err(format!("Loop {} exit node {} does not exist", guard.counter, exit));
                }
            }
        }

        // 2, 3, 5. edges
        for (from, edges) in &self.edges {
            if !self.exists(from) {
                return Err(format!("Edge source {} does not exist", from));
            }
            if edges.len() > 1 {
                return Err(format!(
                    "Node {} has {} outgoing edges; exactly one is allowed",
                    from,
                    edges.len()
                ));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(to) => {
                        if !self.target_exists(to) {
                            return Err(format!("Edge target {} does not exist", to));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        if branches.is_empty() {
                            return Err(format!("Conditional edge from {} declares no branches", from));
                        }
                        for to in branches.values() {
                            if !self.target_exists(to) {
                                return Err(format!("Branch target {} does not exist", to));
                            }
                        }
                    }
                    Edge::LoopGate(counter) => {
                        let guard = self
                            .loop_named(counter)
                            .ok_or_else(|| format!("Node {} gates unknown loop {}", from, counter))?;
                        if guard.gate.as_deref() != Some(from.as_str()) {
                            return Err(format!("Node {} is not the gate of loop {}", from, counter));
                        }
                    }
                }
            }
        }

        let mut missing: Vec<&str> = self
            .nodes
            .keys()
            .filter(|n| self.edges.get(*n).map_or(true, Vec::is_empty))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(format!("Nodes without an outgoing edge: {}", missing.join(", ")));
        }

        // 4. termination marker
        let reaches_end = self.nodes.keys().any(|n| self.successors(n, false).contains(&END));
        if !reaches_end {
            return Err("No edge reaches END".to_string());
        }

        // 6. loop shape
        for guard in &self.loops {
            let (Some(body), Some(gate), Some(retry)) =
                (guard.body.as_deref(), guard.gate.as_deref(), guard.retry_target())
            else {
                continue;
            };
            if !matches!(self.edges.get(gate).and_then(|e| e.first()), Some(Edge::LoopGate(c)) if c == &guard.counter)
            {
                return Err(format!("Gate {} of loop {} is not wired to it", gate, guard.counter));
            }
            if !self.reachable_from(retry).contains(body) {
                return Err(format!(
                    "Loop {} body {} is not reachable from its retry target {}",
                    guard.counter, body, retry
                ));
            }
            if !self.reachable_from(body).contains(gate) {
                return Err(format!(
                    "Loop {} gate {} is not reachable from its body {}",
                    guard.counter, gate, body
                ));
            }
            if retry != body && self.reachable_avoiding(retry, Some(body)).contains(gate) {
                return Err(format!(
                    "Loop {} can return from {} to gate {} without running body {}",
                    guard.counter, retry, gate, body
                ));
            }
        }

        // 7. no unguarded cycles
        if let Some(node) = self.find_cycle() {
            return Err(format!(
                "Cycle through {} is not guarded by a bounded loop",
                node
            ));
        }

        Ok(())
    }

    /// First node found on a cycle once loop back-edges are removed
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(graph: &'a Graph, node: &'a str, marks: &mut HashMap<&'a str, Mark>) -> Option<String> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(node.to_string()),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for next in graph.successors(node, false) {
                if next == END {
                    continue;
                }
                if let Some(found) = visit(graph, next, marks) {
                    return Some(found);
                }
            }
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        for node in names {
            if let Some(found) = visit(self, node, &mut marks) {
                return Some(found);
            }
        }
        None
    }

    /// Nodes no path from the entry reaches
    pub fn unreachable_nodes(&self) -> BTreeSet<String> {
        let Some(entry) = self.entry.as_deref() else {
            return self.nodes.keys().cloned().collect();
        };
        let reachable = self.reachable_from(entry);
        self.nodes
            .keys()
            .filter(|n| !reachable.contains(*n))
            .cloned()
            .collect()
    }
}

/// Immutable, validated graph shared by engines
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    inner: Arc<Graph>,
}

impl CompiledGraph {
    /// Validate and freeze a graph
    pub(crate) fn new(graph: Graph) -> std::result::Result<Self, String> {
        graph.validate()?;
        Ok(Self {
            inner: Arc::new(graph),
        })
    }

    pub fn entry(&self) -> &str {
        self.inner.entry.as_deref().unwrap_or_default()
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.inner.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.nodes.contains_key(name)
    }

    /// Node names in sorted order
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The single outgoing edge of a node
    pub fn edge(&self, node: &str) -> Option<&Edge> {
        self.inner.edges.get(node).and_then(|edges| edges.first())
    }

    pub fn bounded_loop(&self, counter: &str) -> Option<&BoundedLoop> {
        self.inner.loop_named(counter)
    }

    /// Loops whose counter advances when `node` completes
    pub fn loops_with_body<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a BoundedLoop> + 'a {
        self.inner
            .loops
            .iter()
            .filter(move |l| l.body.as_deref() == Some(node))
    }

    pub fn loops(&self) -> &[BoundedLoop] {
        &self.inner.loops
    }

    pub fn schema(&self) -> &StateSchema {
        &self.inner.schema
    }

    /// Render the topology as a diagram
    pub fn visualize(&self, format: VisualizationFormat) -> String {
        let options = VisualizationOptions {
            format,
            ..Default::default()
        };
        visualize(&self.inner, &options)
    }

    pub fn visualize_with(&self, options: &VisualizationOptions) -> String {
        visualize(&self.inner, options)
    }
}
