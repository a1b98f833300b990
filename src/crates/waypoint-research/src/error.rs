//! Error types for the research workflow
//!
//! Graph and engine failures, invalid settings included, pass through
//! unchanged as [`ResearchError::Graph`].

use thiserror::Error;
use waypoint_core::GraphError;

/// Result type for research operations
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors raised while building or driving the research assistant
#[derive(Error, Debug)]
pub enum ResearchError {
    /// The query could not be turned into workflow input
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Graph construction or execution error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl ResearchError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResearchError::Graph(err) if err.is_retryable())
    }
}
