//! Workflow state, state deltas and per-field reducers
//!
//! A single [`State`] record is threaded through every node of a graph. Nodes
//! never mutate it directly: they return a [`StateDelta`], and the engine merges
//! that delta at the node boundary using the graph's [`StateSchema`].
//!
//! # Layout
//!
//! ```text
//! State
//! ├── original_input   first input the thread ever received
//! ├── input            current effective input (resume may rewrite it)
//! ├── turns            append-only conversation log
//! ├── fields           node-produced values, merged per field by a Reducer
//! ├── counters         bounded-loop counters, owned by the loop controller
//! └── output           terminal output
//! ```
//!
//! # Merge rules
//!
//! | Part      | Rule                                             |
//! |-----------|--------------------------------------------------|
//! | `input`   | overwrite when the delta carries one             |
//! | `turns`   | append                                           |
//! | `fields`  | per-field reducer, [`OverwriteReducer`] default  |
//! | `counters`| not reachable from a delta                       |
//! | `output`  | overwrite when the delta carries one             |
//!
//! Nothing a node returns can delete a field. The only deletion in the system is
//! the loop controller clearing its own counter on loop exit.
//!
//! # Custom reducers
//!
//! ```rust
//! use serde_json::{json, Value};
//! use waypoint_core::state::{Reducer, StateError};
//!
//! #[derive(Debug)]
//! struct MaxReducer;
//!
//! impl Reducer for MaxReducer {
//!     fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
//!         let a = current.as_f64().unwrap_or(f64::MIN);
//!         let b = update.as_f64().unwrap_or(f64::MIN);
//!         Ok(json!(a.max(b)))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "max"
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while merging a delta into state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Reducer '{reducer}' failed on field '{field}': {message}")]
    Reducer {
        reducer: String,
        field: String,
        message: String,
    },

    #[error("State could not be decoded: {0}")]
    Decode(String),
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Node that produced the turn, if any
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            node: None,
            at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User turn describing a structured input value
    pub fn user_input(input: &Value) -> Self {
        Self::user(render_value(input))
    }

    pub fn from_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Human-readable text for an input value.
///
/// Strings render as-is, objects with a string `query` render as that query,
/// everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("query").and_then(Value::as_str) {
            Some(query) => query.to_string(),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// The record threaded through a graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub original_input: Value,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub counters: BTreeMap<String, u32>,
    #[serde(default)]
    pub output: Option<Value>,
}

impl State {
    /// Fresh state for a new thread
    pub fn new(input: Value) -> Self {
        Self {
            original_input: input.clone(),
            input,
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    /// Look up a key of the current input object
    pub fn input_value(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// Current value of a loop counter (zero when unset)
    pub fn counter(&self, name: &str) -> u32 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub(crate) fn increment_counter(&mut self, name: &str) -> u32 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    pub(crate) fn clear_counter(&mut self, name: &str) -> Option<u32> {
        self.counters.remove(name)
    }

    pub fn to_value(&self) -> Result<Value, StateError> {
        serde_json::to_value(self).map_err(|e| StateError::Decode(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, StateError> {
        serde_json::from_value(value).map_err(|e| StateError::Decode(e.to_string()))
    }
}

/// Changes a node asks the engine to apply
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub output: Option<Value>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn push_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.turns.is_empty() && self.fields.is_empty() && self.output.is_none()
    }
}

/// Merge strategy for one state field
pub trait Reducer: Send + Sync + std::fmt::Debug {
    /// Combine the current value (`Null` when unset) with an update
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError>;

    fn name(&self) -> &str;
}

/// Overwrite reducer - last write wins
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value, StateError> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Append reducer - accumulates into an array
///
/// - **Array + Array**: concatenates
/// - **Array + Scalar**: pushes the scalar
/// - **Null + anything**: starts a new array
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
        match (current, update) {
            (Value::Array(curr), Value::Array(upd)) => {
                let mut result = curr.clone();
                result.extend_from_slice(upd);
                Ok(Value::Array(result))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(curr), single) => {
                let mut result = curr.clone();
                result.push(single.clone());
                Ok(Value::Array(result))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            (other, _) => Err(StateError::Reducer {
                reducer: self.name().to_string(),
                field: String::new(),
                message: format!("current value is not an array: {}", other),
            }),
        }
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Merge reducer - shallow-merges objects, later keys win
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
        match (current, update) {
            (Value::Object(curr), Value::Object(upd)) => {
                let mut result = curr.clone();
                for (key, value) in upd {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(result))
            }
            (Value::Null, Value::Object(_)) => Ok(update.clone()),
            _ => Err(StateError::Reducer {
                reducer: self.name().to_string(),
                field: String::new(),
                message: "merge requires object values".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Field reducers declared for a graph
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    reducers: HashMap<String, Arc<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the reducer for a field
    pub fn set_reducer(&mut self, field: impl Into<String>, reducer: Arc<dyn Reducer>) {
        self.reducers.insert(field.into(), reducer);
    }

    pub fn with_reducer(mut self, field: impl Into<String>, reducer: Arc<dyn Reducer>) -> Self {
        self.set_reducer(field, reducer);
        self
    }

    /// Reducer for a field, overwrite when none was declared
    pub fn reducer_for(&self, field: &str) -> &dyn Reducer {
        match self.reducers.get(field) {
            Some(reducer) => reducer.as_ref(),
            None => &OverwriteReducer,
        }
    }

    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }

    /// Merge a delta into state.
    ///
    /// Either every part of the delta is applied or, on a reducer failure,
    /// `state` is left untouched.
    pub fn apply(&self, state: &mut State, delta: StateDelta) -> Result<(), StateError> {
        let mut merged = BTreeMap::new();
        for (field, update) in &delta.fields {
            let reducer = self.reducer_for(field);
            let current = state.fields.get(field).unwrap_or(&Value::Null);
            let value = reducer.reduce(current, update).map_err(|err| match err {
                StateError::Reducer { reducer, message, .. } => StateError::Reducer {
                    reducer,
                    field: field.clone(),
                    message,
                },
                other => other,
            })?;
            merged.insert(field.clone(), value);
        }

        state.fields.extend(merged);
        if let Some(input) = delta.input {
            state.input = input;
        }
        state.turns.extend(delta.turns);
        if let Some(output) = delta.output {
            state.output = Some(output);
        }
        Ok(())
    }
}
