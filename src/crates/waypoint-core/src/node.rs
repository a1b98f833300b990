//! Agent functions: the contract every node implements
//!
//! A node receives a read-only copy of the current [`State`] and produces
//! exactly one of:
//!
//! - a [`StateDelta`] to merge ([`NodeOutput::Update`])
//! - an [`InterruptRequest`] asking the caller for input ([`NodeOutput::Interrupt`])
//! - a typed [`NodeError`]
//!
//! Nodes may be invoked more than once with the same input (a resume re-runs
//! the paused node, a crash between execution and commit re-runs the step), so
//! they must not depend on engine bookkeeping from earlier invocations.
//!
//! Nodes are registered either as closures or as [`Agent`] trait objects:
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use waypoint_core::node::{Agent, NodeOutput, NodeResult};
//! use waypoint_core::state::{State, StateDelta};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Agent for Echo {
//!     async fn run(&self, state: &State) -> NodeResult {
//!         Ok(NodeOutput::Update(StateDelta::new().with_output(state.input.clone())))
//!     }
//! }
//!
//! let agent: Arc<dyn Agent> = Arc::new(Echo);
//! let _executor = waypoint_core::node::agent_executor(agent);
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::interrupt::InterruptRequest;
use crate::state::{State, StateDelta};

/// Node identifier
pub type NodeId = String;

/// What a node produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Update(StateDelta),
    Interrupt(InterruptRequest),
}

impl From<StateDelta> for NodeOutput {
    fn from(delta: StateDelta) -> Self {
        NodeOutput::Update(delta)
    }
}

impl From<InterruptRequest> for NodeOutput {
    fn from(request: InterruptRequest) -> Self {
        NodeOutput::Interrupt(request)
    }
}

/// Typed failure of an agent function
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// Agent failed; `retryable` marks transient failures for [`RetryPolicy`](crate::retry::RetryPolicy)
    #[error("{message}")]
    Failed { message: String, retryable: bool },

    /// The state did not contain what the agent needs
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The invocation exceeded its time budget
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl NodeError {
    /// Permanent failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Transient failure worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Failed { retryable, .. } => *retryable,
            NodeError::Timeout(_) => true,
            NodeError::InvalidState(_) => false,
        }
    }
}

/// Result of one node invocation
pub type NodeResult = std::result::Result<NodeOutput, NodeError>;

/// Type-erased async node function
pub type NodeExecutor = Arc<dyn Fn(State) -> BoxFuture<'static, NodeResult> + Send + Sync>;

/// Box a closure returning a future into a [`NodeExecutor`]
pub fn executor_fn<F, Fut>(f: F) -> NodeExecutor
where
    F: Fn(State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// An agent collaborator usable as a node
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, state: &State) -> NodeResult;
}

/// Adapt an [`Agent`] into a [`NodeExecutor`]
pub fn agent_executor(agent: Arc<dyn Agent>) -> NodeExecutor {
    Arc::new(move |state: State| {
        let agent = Arc::clone(&agent);
        Box::pin(async move { agent.run(&state).await })
    })
}

/// A registered node
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeExecutor,
    /// Per-invocation time budget, overriding the engine default
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl NodeSpec {
    pub fn new(name: impl Into<NodeId>, executor: NodeExecutor) -> Self {
        Self {
            name: name.into(),
            executor,
            timeout: None,
            description: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .field("timeout", &self.timeout)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter;

    #[async_trait]
    impl Agent for Counter {
        async fn run(&self, state: &State) -> NodeResult {
            let seen = state.field_f64("seen").unwrap_or(0.0);
            Ok(StateDelta::new().with_field("seen", seen + 1.0).into())
        }
    }

    #[tokio::test]
    async fn test_agent_executor() {
        let executor = agent_executor(Arc::new(Counter));
        let output = executor(State::new(json!({}))).await.unwrap();

        match output {
            NodeOutput::Update(delta) => assert_eq!(delta.fields.get("seen"), Some(&json!(1.0))),
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_executor_fn() {
        let executor = executor_fn(|_state| async { Err::<NodeOutput, _>(NodeError::failed("boom")) });
        let err = executor(State::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(NodeError::transient("503").is_retryable());
        assert!(NodeError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(!NodeError::InvalidState("no query".into()).is_retryable());
    }

    #[test]
    fn test_spec_debug_hides_executor() {
        let spec = NodeSpec::new("work", executor_fn(|_s| async { Ok::<_, NodeError>(NodeOutput::Update(StateDelta::new())) }))
            .with_timeout(Duration::from_secs(1));
        let rendered = format!("{:?}", spec);
        assert!(rendered.contains("<function>"));
        assert!(rendered.contains("work"));
    }
}
