//! Routing predicates of the research graph
//!
//! Pure functions over [`State`]; the workflow wires them into conditional
//! edges and the validation loop.

use waypoint_core::{RoutingDecision, State};

use crate::agents::{IntentCategory, Verdict};

/// State field holding the analyzed [`IntentCategory`]
pub const INTENT_CATEGORY: &str = "intent_category";
pub const COMPANY: &str = "company";
pub const TOPIC: &str = "query_topic";
pub const FINDINGS: &str = "findings";
/// Confidence of the latest findings, 0-10
pub const CONFIDENCE_SCORE: &str = "confidence_score";
/// Latest [`Verdict`] of the validator
pub const VALIDATION_RESULT: &str = "validation_result";
pub const VALIDATION_FEEDBACK: &str = "validation_feedback";
/// Loop counter of research passes
pub const RESEARCH_ATTEMPTS: &str = "research_attempts";
/// Loop counter of research passes seen by the error handler
pub const RESEARCH_RECOVERIES: &str = "research_recoveries";
/// Latest agent failure as `{"node", "message"}`, null once a pass succeeds
pub const NODE_ERROR: &str = "node_error";
/// One record per research pass, appended
pub const RETRY_HISTORY: &str = "retry_history";

pub const GREETING: &str = "greeting";
pub const RESEARCH: &str = "research";
pub const VALIDATOR: &str = "validator";
pub const SYNTHESIS: &str = "synthesis";
pub const ERROR_HANDLER: &str = "error_handler";

/// Node whose agent failed most recently, if the failure is still current
pub fn failed_node(state: &State) -> Option<&str> {
    state.field(NODE_ERROR)?.get("node")?.as_str()
}

/// `greeting` for greetings, `research` for everything else that got past intent
pub fn route_after_intent(state: &State) -> RoutingDecision {
    if state.field_str(INTENT_CATEGORY) == Some(IntentCategory::Greeting.as_str()) {
        RoutingDecision::new(GREETING)
    } else {
        RoutingDecision::new(RESEARCH)
    }
}

/// `error_handler` after a failed pass, then `synthesis` when confidence
/// reaches `threshold` and `validator` otherwise
pub fn route_after_research(state: &State, threshold: f64) -> RoutingDecision {
    if research_failed(state) {
        return RoutingDecision::new(ERROR_HANDLER);
    }
    let confidence = state.field_f64(CONFIDENCE_SCORE).unwrap_or(0.0);
    if confidence >= threshold {
        RoutingDecision::new(SYNTHESIS)
    } else {
        RoutingDecision::new(VALIDATOR)
    }
}

/// Whether the validator asked for another research pass.
///
/// A validator that failed asks for nothing; synthesis works with what is there.
pub fn needs_more_research(state: &State) -> bool {
    failed_node(state) != Some(VALIDATOR)
        && state.field_str(VALIDATION_RESULT) == Some(Verdict::Insufficient.as_str())
}

/// Whether the latest research pass failed
pub fn research_failed(state: &State) -> bool {
    failed_node(state) == Some(RESEARCH)
}
