//! The research graph
//!
//! ```text
//!                 ┌─────────── greeting ──► END
//!                 │
//!  intent ─(route)┤                      ┌──── synthesis ──► END
//!   ▲  │          └─► research ─(score)──┤          ▲
//!   │  │               ▲  ▲  │           └─► validator ─(exit)┤
//!   └──┘ interrupt     │  │  └─(failed)─► error_handler ─(exit)┘
//!                      │  └──── retry while insufficient ┘  │
//!                      └────── retry while budget remains ──┘
//! ```
//!
//! `validator` gates a bounded loop over `research` counted in
//! `research_attempts`. When the attempts run out synthesis proceeds with
//! whatever findings the state holds.
//!
//! Agent failures degrade instead of failing the thread:
//!
//! - intent: the caller is asked to rephrase
//! - research: `error_handler` retries within the same attempt budget
//! - validator: synthesis proceeds with the findings available
//! - synthesis: the latest findings summary is returned as the answer

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use waypoint_core::{
    AppendReducer, BoundedLoop, CompiledGraph, InterruptRequest, NodeError, NodeOutput, ResumeTarget, State,
    StateDelta, StateGraph, Turn, ValidateConfig,
};

use crate::agents::{
    IntentAnalysis, IntentAnalyzer, IntentCategory, QualityValidator, ResearchFindings, Researcher, Synthesizer,
    Validation,
};
use crate::config::ResearchConfig;
use crate::error::Result;
use crate::routing::{
    needs_more_research, research_failed, route_after_intent, route_after_research, COMPANY, CONFIDENCE_SCORE,
    ERROR_HANDLER, FINDINGS, GREETING, INTENT_CATEGORY, NODE_ERROR, RESEARCH, RESEARCH_ATTEMPTS,
    RESEARCH_RECOVERIES, RETRY_HISTORY, SYNTHESIS, TOPIC, VALIDATION_FEEDBACK, VALIDATION_RESULT, VALIDATOR,
};

pub const INTENT: &str = "intent";

/// Interrupt kind raised for manipulation, insider trading, or harmful queries
pub const QUERY_BLOCKED: &str = "query_blocked";

const GREETING_RESPONSE: &str =
    "Hello! I can research companies for you: news, financials, leadership, and market position. What would you like to know?";

const DEFAULT_CLARIFICATION: &str = "Which company would you like me to research?";

const DEFAULT_BLOCKED: &str = "Your query was blocked. Please ask a legitimate research question.";

const REPHRASE: &str = "I couldn't work out what you are asking. Could you rephrase it and name the company?";

/// The four agent collaborators
#[derive(Clone)]
pub struct ResearchAgents {
    pub intent: Arc<dyn IntentAnalyzer>,
    pub researcher: Arc<dyn Researcher>,
    pub validator: Arc<dyn QualityValidator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for ResearchAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAgents").finish_non_exhaustive()
    }
}

/// Build and compile the research graph
pub fn research_graph(agents: &ResearchAgents, config: &ResearchConfig) -> Result<CompiledGraph> {
    config.validate()?;

    let mut graph = StateGraph::new();

    let analyzer = Arc::clone(&agents.intent);
    graph.add_node(INTENT, move |state: State| {
        let analyzer = Arc::clone(&analyzer);
        async move {
            match analyzer.analyze(&state).await {
                Ok(analysis) => {
                    debug!(category = analysis.category.as_str(), "Intent analyzed");
                    Ok(intent_output(analysis))
                }
                Err(err) => {
                    warn!(error = %err, "Intent analysis failed, asking the caller to rephrase");
                    Ok(InterruptRequest::clarification(REPHRASE)
                        .with_context(json!({"error": err.to_string()}))
                        .into())
                }
            }
        }
    });

    graph.add_node(GREETING, |_state| async {
        Ok(NodeOutput::Update(
            StateDelta::new()
                .push_turn(Turn::assistant(GREETING_RESPONSE).from_node(GREETING))
                .with_output(json!({"intent": IntentCategory::Greeting.as_str(), "response": GREETING_RESPONSE})),
        ))
    });

    let researcher = Arc::clone(&agents.researcher);
    graph.add_node(RESEARCH, move |state: State| {
        let researcher = Arc::clone(&researcher);
        async move {
            let attempt = state.counter(RESEARCH_ATTEMPTS) + 1;
            let delta = match researcher.research(&state).await {
                Ok(findings) => {
                    info!(confidence = findings.confidence_score, attempt, "Research pass finished");
                    let record = attempt_record(&state, attempt).with_confidence(findings.confidence_score);
                    findings_delta(findings)?
                        .with_field(NODE_ERROR, Value::Null)
                        .with_field(RETRY_HISTORY, record.into_value())
                }
                Err(err) => {
                    warn!(error = %err, attempt, "Research pass failed");
                    let record = attempt_record(&state, attempt).with_error(err.to_string());
                    failure_delta(RESEARCH, &err).with_field(RETRY_HISTORY, record.into_value())
                }
            };
            Ok(NodeOutput::Update(delta))
        }
    });

    let validator = Arc::clone(&agents.validator);
    graph.add_node(VALIDATOR, move |state: State| {
        let validator = Arc::clone(&validator);
        async move {
            let delta = match validator.validate(&state).await {
                Ok(validation) => validation_delta(validation).with_field(NODE_ERROR, Value::Null),
                Err(err) => {
                    warn!(error = %err, "Validation failed, proceeding with available findings");
                    failure_delta(VALIDATOR, &err)
                }
            };
            Ok(NodeOutput::Update(delta))
        }
    });

    let max_attempts = config.max_research_attempts;
    graph.add_node(ERROR_HANDLER, move |state: State| async move {
        let passes = state.counter(RESEARCH_RECOVERIES);
        let retrying = research_failed(&state) && passes < max_attempts;
        let notice = if retrying {
            "[System] I encountered an issue. Retrying research."
        } else {
            "[System] I encountered an issue. Proceeding with best effort."
        };
        info!(passes, retrying, "Handling research failure");
        Ok(NodeOutput::Update(
            StateDelta::new().push_turn(Turn::assistant(notice).from_node(ERROR_HANDLER)),
        ))
    });

    let synthesizer = Arc::clone(&agents.synthesizer);
    graph.add_node(SYNTHESIS, move |state: State| {
        let synthesizer = Arc::clone(&synthesizer);
        async move {
            let answer = match synthesizer.synthesize(&state).await {
                Ok(answer) => answer,
                Err(err) => {
                    warn!(error = %err, "Synthesis failed, answering with the latest findings");
                    fallback_answer(&state)
                }
            };
            let output = json!({
                "intent": state.field(INTENT_CATEGORY).cloned().unwrap_or(Value::Null),
                "company": state.field(COMPANY).cloned().unwrap_or(Value::Null),
                "confidence_score": state.field(CONFIDENCE_SCORE).cloned().unwrap_or(Value::Null),
                "validation_result": state.field(VALIDATION_RESULT).cloned().unwrap_or(Value::Null),
                "response": answer.clone(),
            });
            Ok(NodeOutput::Update(
                StateDelta::new()
                    .push_turn(Turn::assistant(answer).from_node(SYNTHESIS))
                    .with_output(output),
            ))
        }
    });

    let threshold = config.confidence_threshold;
    graph
        .set_entry(INTENT)
        .add_conditional_edge(INTENT, route_after_intent, branches(&[GREETING, RESEARCH]))
        .add_conditional_edge(
            RESEARCH,
            move |state| route_after_research(state, threshold),
            branches(&[VALIDATOR, SYNTHESIS, ERROR_HANDLER]),
        )
        .add_bounded_loop(
            BoundedLoop::new(RESEARCH_ATTEMPTS, config.max_research_attempts)
                .body(RESEARCH)
                .gate(VALIDATOR)
                .exit_to(SYNTHESIS)
                .retry_when(needs_more_research),
        )
        .add_bounded_loop(
            BoundedLoop::new(RESEARCH_RECOVERIES, config.max_research_attempts)
                .body(RESEARCH)
                .gate(ERROR_HANDLER)
                .exit_to(SYNTHESIS)
                .retry_when(research_failed),
        )
        .set_field_reducer(RETRY_HISTORY, Arc::new(AppendReducer))
        .add_finish(GREETING)
        .add_finish(SYNTHESIS);

    Ok(graph.compile()?)
}

/// Routing keys named after their target nodes
fn branches(nodes: &[&str]) -> HashMap<String, String> {
    nodes.iter().map(|n| (n.to_string(), n.to_string())).collect()
}

/// Interrupt for unclear or blocked queries, field updates otherwise
fn intent_output(analysis: IntentAnalysis) -> NodeOutput {
    let category = analysis.category;

    if category.is_blocked() {
        info!(category = category.as_str(), "Query blocked");
        let question = analysis.question.unwrap_or_else(|| DEFAULT_BLOCKED.to_string());
        return InterruptRequest::new(QUERY_BLOCKED, question)
            .with_target(ResumeTarget::ReplaceInput)
            .with_context(json!({"intent_category": category.as_str()}))
            .into();
    }

    if category == IntentCategory::Unclear {
        let question = analysis.question.unwrap_or_else(|| DEFAULT_CLARIFICATION.to_string());
        return InterruptRequest::clarification(question)
            .with_context(json!({"company": analysis.company, "topic": analysis.topic}))
            .into();
    }

    let mut delta = StateDelta::new().with_field(INTENT_CATEGORY, category.as_str());
    if let Some(company) = analysis.company {
        delta = delta.with_field(COMPANY, company);
    }
    if let Some(topic) = analysis.topic {
        delta = delta.with_field(TOPIC, topic);
    }
    delta.into()
}

fn findings_delta(findings: ResearchFindings) -> std::result::Result<StateDelta, NodeError> {
    let summary = findings.summary.clone();
    let confidence = findings.confidence_score;
    let value = serde_json::to_value(&findings)
        .map_err(|e| NodeError::failed(format!("findings are not serializable: {}", e)))?;

    Ok(StateDelta::new()
        .with_field(FINDINGS, value)
        .with_field(CONFIDENCE_SCORE, confidence)
        .push_turn(
            Turn::assistant(summary)
                .from_node(RESEARCH)
                .with_metadata(CONFIDENCE_SCORE, json!(confidence)),
        ))
}

/// Record a failed agent so routing can recover from it
fn failure_delta(node: &str, err: &NodeError) -> StateDelta {
    StateDelta::new()
        .with_field(NODE_ERROR, json!({"node": node, "message": err.to_string()}))
        .push_turn(
            Turn::assistant(format!("[{}] Error: {}", node, err))
                .from_node(node)
                .with_metadata("error", Value::Bool(true)),
        )
}

/// Answer built from the latest findings when the synthesizer fails
fn fallback_answer(state: &State) -> String {
    match state.field(FINDINGS).and_then(|f| f.get("summary")).and_then(Value::as_str) {
        Some(summary) => format!("I could not compose a full report. Here is what I found: {}", summary),
        None => "I could not complete the research for this query. Please try again later.".to_string(),
    }
}

/// One entry of the retry history
#[derive(Debug, Clone, PartialEq, Serialize)]
struct AttemptRecord {
    attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence_score: Option<f64>,
    /// Verdict and feedback that sent research round again, if any
    previous_validation: Option<String>,
    feedback_received: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: String,
}

impl AttemptRecord {
    fn with_confidence(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }

    fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn attempt_record(state: &State, attempt: u32) -> AttemptRecord {
    AttemptRecord {
        attempt,
        confidence_score: None,
        previous_validation: state.field_str(VALIDATION_RESULT).map(str::to_string),
        feedback_received: state.field_str(VALIDATION_FEEDBACK).map(str::to_string),
        error: None,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

fn validation_delta(validation: Validation) -> StateDelta {
    StateDelta::new()
        .with_field(VALIDATION_RESULT, validation.verdict.as_str())
        .with_field(
            VALIDATION_FEEDBACK,
            validation.feedback.map(Value::String).unwrap_or(Value::Null),
        )
}
