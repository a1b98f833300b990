//! Error types and structured error descriptors for workflow execution
//!
//! This module defines every error that can occur while building a graph,
//! running it, resuming it, or persisting its checkpoints. All errors derive
//! `std::error::Error` via `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation          - Malformed topology, rejected by compile()
//! ├── NodeExecution       - An agent function failed
//! ├── InvalidResume       - Resume on a thread that is not suspended, or a bad response
//! ├── Persistence         - The checkpoint store failed to commit
//! ├── ThreadNotFound      - No checkpoint exists for the thread
//! ├── UndeclaredRoute     - A router returned a key outside its declared branches
//! ├── StepLimitExceeded   - A run executed more nodes than allowed
//! ├── Timeout             - A node exceeded its time budget
//! ├── State               - A delta could not be merged into state
//! ├── Configuration       - Invalid engine configuration
//! ├── Serialization/Yaml/Io
//! └── Execution           - Anything else inside the engine
//! ```
//!
//! # Where errors surface
//!
//! Errors split into two groups:
//!
//! - **Returned** from public operations as `Err(GraphError)`: `Validation`,
//!   `InvalidResume`, `Persistence`, `ThreadNotFound`, `Configuration`. None
//!   of these change the thread's committed history.
//! - **Captured** in a `Failed` checkpoint and reported through
//!   [`Outcome::Failed`](crate::engine::Outcome::Failed): node failures,
//!   timeouts, undeclared routes, state merge failures and step-limit
//!   overruns. The caller receives an [`ErrorDescriptor`], never the raw error.
//!
//! Loop exhaustion is not an error; the bounded loop simply routes forward.
//!
//! # Example
//!
//! ```rust
//! use waypoint_core::error::{ErrorKind, GraphError};
//!
//! let err = GraphError::node_execution("research", "search backend unavailable");
//! let descriptor = err.descriptor();
//!
//! assert_eq!(descriptor.kind, ErrorKind::NodeExecution);
//! assert_eq!(descriptor.node.as_deref(), Some("research"));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use waypoint_checkpoint::CheckpointError;

use crate::state::StateError;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur during graph construction and execution
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure is invalid
    ///
    /// Raised only by [`StateGraph::compile`](crate::builder::StateGraph::compile).
    /// Fatal: the graph cannot be used.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node's agent function returned an error
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// Resume rejected without touching state
    #[error("Invalid resume for thread '{thread_id}': {reason}")]
    InvalidResume { thread_id: String, reason: String },

    /// Checkpoint store failed to commit
    ///
    /// The step did not happen; retrying the same operation is safe.
    #[error("Persistence error: {0}")]
    Persistence(#[from] CheckpointError),

    /// No checkpoint exists for the thread
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// A router produced a key outside its declared branch set
    #[error("Node '{node}' routed to undeclared branch '{route}'")]
    UndeclaredRoute { node: String, route: String },

    /// Too many node executions in a single run
    #[error("Step limit of {limit} node executions exceeded")]
    StepLimitExceeded { limit: usize },

    /// Node exceeded its time budget
    #[error("Node '{node}' timed out after {duration_ms}ms")]
    Timeout { node: String, duration_ms: u64 },

    /// A state delta could not be merged
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic execution error without specific node context
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl GraphError {
    /// Create a node execution error
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create an invalid-resume error
    pub fn invalid_resume(thread_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResume {
            thread_id: thread_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an undeclared-route error
    pub fn undeclared_route(node: impl Into<String>, route: impl Into<String>) -> Self {
        Self::UndeclaredRoute {
            node: node.into(),
            route: route.into(),
        }
    }

    /// The taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Validation(_) => ErrorKind::Validation,
            GraphError::NodeExecution { .. } => ErrorKind::NodeExecution,
            GraphError::InvalidResume { .. } => ErrorKind::InvalidResume,
            GraphError::Persistence(_) => ErrorKind::Persistence,
            GraphError::ThreadNotFound(_) => ErrorKind::ThreadNotFound,
            GraphError::UndeclaredRoute { .. } => ErrorKind::UndeclaredRoute,
            GraphError::StepLimitExceeded { .. } => ErrorKind::StepLimitExceeded,
            GraphError::Timeout { .. } => ErrorKind::Timeout,
            GraphError::State(_) => ErrorKind::State,
            GraphError::Configuration(_) => ErrorKind::Configuration,
            GraphError::Serialization(_) | GraphError::Yaml(_) => ErrorKind::Serialization,
            GraphError::Io(_) | GraphError::Execution(_) => ErrorKind::Execution,
        }
    }

    /// Node the error is attributed to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            GraphError::NodeExecution { node, .. }
            | GraphError::UndeclaredRoute { node, .. }
            | GraphError::Timeout { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Whether retrying the same caller operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::Persistence(_))
    }

    /// Structured, serializable form of this error
    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            kind: self.kind(),
            message: self.to_string(),
            node: self.node().map(str::to_string),
        }
    }
}

/// Coarse error category carried in descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NodeExecution,
    InvalidResume,
    Persistence,
    ThreadNotFound,
    UndeclaredRoute,
    StepLimitExceeded,
    Timeout,
    State,
    Configuration,
    Serialization,
    Execution,
}

/// Structured error attached to `Failed` checkpoints and returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub node: Option<String>,
}

impl From<&GraphError> for ErrorDescriptor {
    fn from(err: &GraphError) -> Self {
        err.descriptor()
    }
}

impl std::fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_display() {
        let err = GraphError::node_execution("llm_call", "API timeout");
        assert_eq!(err.to_string(), "Node 'llm_call' execution failed: API timeout");
        assert_eq!(err.node(), Some("llm_call"));
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let err = GraphError::undeclared_route("gate", "sideways");
        let descriptor = err.descriptor();

        assert_eq!(descriptor.kind, ErrorKind::UndeclaredRoute);
        assert_eq!(descriptor.node.as_deref(), Some("gate"));

        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(value["kind"], "undeclared_route");

        let restored: ErrorDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(restored, descriptor);
    }

    #[test]
    fn test_persistence_is_retryable() {
        let err: GraphError = CheckpointError::Storage("disk full".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Persistence);

        assert!(!GraphError::invalid_resume("t", "not suspended").is_retryable());
    }
}
