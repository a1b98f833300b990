//! # waypoint-research - Company Research Workflow
//!
//! A multi-agent research assistant assembled from `waypoint-core` parts:
//!
//! - **Intent** - classify the query; greetings get a direct answer, unclear
//!   queries pause for a clarification, blocked queries (manipulation,
//!   insider trading, harmful) pause until a new query arrives.
//! - **Research** - gather findings with a 0-10 confidence score.
//! - **Validation** - low-confidence findings are checked; insufficient ones
//!   trigger another research pass, up to `max_research_attempts`.
//! - **Synthesis** - compose the final answer from the best findings available.
//!
//! An agent that fails does not fail the thread; [`workflow`] lists how each
//! failure is recovered.
//!
//! The model-backed agents are supplied by the caller through the traits in
//! [`agents`].
//!
//! ```rust,ignore
//! use waypoint_research::{ResearchAgents, ResearchAssistant, ResearchConfig};
//!
//! let agents = ResearchAgents { intent, researcher, validator, synthesizer };
//! let assistant = ResearchAssistant::new(agents, ResearchConfig::default()).await?;
//!
//! let result = assistant.ask(None, "What is Apple's current stock price?").await?;
//! if let Some(request) = result.interrupt() {
//!     println!("{}", request.question);
//!     assistant.answer(&result.thread_id, json!({"company": "Apple"})).await?;
//! }
//! ```

pub mod agents;
pub mod assistant;
pub mod config;
pub mod error;
pub mod routing;
pub mod workflow;

pub use agents::{
    query_text, IntentAnalysis, IntentAnalyzer, IntentCategory, QualityValidator, ResearchFindings, Researcher,
    Synthesizer, Validation, Verdict,
};
pub use assistant::ResearchAssistant;
pub use config::ResearchConfig;
pub use error::{ResearchError, Result};
pub use routing::{needs_more_research, route_after_intent, route_after_research};
pub use workflow::{research_graph, ResearchAgents, QUERY_BLOCKED};
