//! Interrupts: pausing a thread to ask the caller for input
//!
//! A node that cannot proceed without more information returns an
//! [`InterruptRequest`] instead of a state delta. The engine persists a
//! `Suspended` checkpoint recording the paused node and the request, then
//! returns the request to the caller. Nothing else runs on that thread until a
//! response arrives through [`InterruptController::resume`].
//!
//! # Lifecycle
//!
//! ```text
//!   node "intake"                       caller
//!   ─────────────                       ──────
//!   returns InterruptRequest  ──────►   receives { question, expects, ... }
//!        │
//!        ▼
//!   checkpoint(status=suspended,
//!              next="intake",
//!              interrupt=request)
//!                                       resume(thread, {"company": "Acme"})
//!        ┌──────────────────────────────────────┘
//!        ▼
//!   validate shape + required keys   ── reject ──►  InvalidResume, nothing written
//!        │
//!        ▼
//!   inject at request.target, append user turn
//!        │
//!        ▼
//!   re-run "intake" (the same node, not its successor)
//! ```
//!
//! Because the pending request lives in the checkpoint rather than in a
//! suspended future, a suspended thread survives a process restart and stays
//! resumable indefinitely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use waypoint_checkpoint::CheckpointStatus;

use crate::engine::{Engine, RunResult};
use crate::error::{GraphError, Result};
use crate::node::NodeId;
use crate::state::{render_value, State, Turn};

/// Interrupt kind used for missing-information questions
pub const CLARIFICATION_NEEDED: &str = "clarification_needed";

/// Where a resume response is written
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum ResumeTarget {
    /// Merge an object response into the current input; other values land under `input.response`
    #[default]
    MergeInput,
    /// Replace the current input with the response
    ReplaceInput,
    /// Store the response in a state field
    Field(String),
}

/// Expected JSON shape of a resume response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    #[default]
    Any,
    Text,
    Object,
    Number,
    Bool,
}

impl ResponseShape {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ResponseShape::Any => true,
            ResponseShape::Text => value.is_string(),
            ResponseShape::Object => value.is_object(),
            ResponseShape::Number => value.is_number(),
            ResponseShape::Bool => value.is_boolean(),
        }
    }
}

/// A node's request for external input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    #[serde(default = "InterruptRequest::fresh_id")]
    pub id: String,
    /// Paused node; filled in by the engine
    #[serde(default)]
    pub node: NodeId,
    /// Caller-facing category, e.g. `clarification_needed`
    pub kind: String,
    pub question: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub target: ResumeTarget,
    #[serde(default)]
    pub expects: ResponseShape,
    #[serde(default)]
    pub required_keys: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl InterruptRequest {
    fn fresh_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn new(kind: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: Self::fresh_id(),
            node: NodeId::new(),
            kind: kind.into(),
            question: question.into(),
            context: Value::Null,
            target: ResumeTarget::default(),
            expects: ResponseShape::default(),
            required_keys: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Missing-information question
    pub fn clarification(question: impl Into<String>) -> Self {
        Self::new(CLARIFICATION_NEEDED, question)
    }

    pub fn at_node(mut self, node: impl Into<NodeId>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_target(mut self, target: ResumeTarget) -> Self {
        self.target = target;
        self
    }

    pub fn expecting(mut self, shape: ResponseShape) -> Self {
        self.expects = shape;
        self
    }

    /// Require a key in an object response; implies an object response
    pub fn require_key(mut self, key: impl Into<String>) -> Self {
        self.required_keys.push(key.into());
        if self.expects == ResponseShape::Any {
            self.expects = ResponseShape::Object;
        }
        self
    }

    /// Check a response against the declared shape and required keys
    pub fn validate_response(&self, response: &Value) -> std::result::Result<(), String> {
        if !self.expects.matches(response) {
            return Err(format!(
                "expected a {:?} response, got {}",
                self.expects,
                type_name(response)
            ));
        }

        for key in &self.required_keys {
            match response.get(key) {
                Some(value) if !value.is_null() => {}
                _ => return Err(format!("response is missing required key '{}'", key)),
            }
        }
        Ok(())
    }

    /// Write a validated response into state and record it as a user turn
    pub fn inject(&self, state: &mut State, response: Value) {
        let turn = Turn::user(render_value(&response))
            .with_metadata("interrupt_id", Value::String(self.id.clone()))
            .with_metadata("interrupt_kind", Value::String(self.kind.clone()));

        match &self.target {
            ResumeTarget::ReplaceInput => state.input = response,
            ResumeTarget::Field(name) => {
                state.fields.insert(name.clone(), response);
            }
            ResumeTarget::MergeInput => {
                let mut merged = match std::mem::take(&mut state.input) {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        let mut map = Map::new();
                        map.insert("query".to_string(), other);
                        map
                    }
                };
                match response {
                    Value::Object(update) => merged.extend(update),
                    other => {
                        merged.insert("response".to_string(), other);
                    }
                }
                state.input = Value::Object(merged);
            }
        }

        state.turns.push(turn);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Bridges suspended threads and callers
#[derive(Clone)]
pub struct InterruptController {
    engine: Arc<Engine>,
}

impl InterruptController {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Pending request of a suspended thread, if any
    pub async fn pending(&self, thread_id: &str) -> Result<Option<InterruptRequest>> {
        let Some(latest) = self.engine.latest(thread_id).await? else {
            return Err(GraphError::ThreadNotFound(thread_id.to_string()));
        };
        if latest.status != CheckpointStatus::Suspended {
            return Ok(None);
        }
        latest
            .interrupt
            .map(serde_json::from_value)
            .transpose()
            .map_err(GraphError::from)
    }

    /// Persist a pending request for a thread and return it unchanged.
    ///
    /// Callers go through [`ThreadManager::suspend`](crate::session::ThreadManager::suspend),
    /// which holds the thread's lock while the request is written.
    pub(crate) async fn suspend(&self, thread_id: &str, request: InterruptRequest) -> Result<InterruptRequest> {
        self.engine.suspend(thread_id, request).await
    }

    /// Answer a suspended thread and run it until its next resting state.
    ///
    /// Rejected with [`GraphError::InvalidResume`] and no checkpoint written
    /// when the thread is unknown, not suspended, or the response does not
    /// match the request.
    pub(crate) async fn resume(&self, thread_id: &str, response: Value) -> Result<RunResult> {
        let Some(latest) = self.engine.latest(thread_id).await? else {
            warn!(thread_id, "Resume requested for unknown thread");
            return Err(GraphError::invalid_resume(thread_id, "thread does not exist"));
        };

        if latest.status != CheckpointStatus::Suspended {
            warn!(thread_id, status = %latest.status, "Resume requested for thread that is not suspended");
            return Err(GraphError::invalid_resume(
                thread_id,
                format!("thread is {}, not suspended", latest.status),
            ));
        }

        info!(thread_id, step = latest.step, "Resuming suspended thread");
        self.engine.resume_from(latest, response).await
    }
}

impl std::fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptController").finish_non_exhaustive()
    }
}
