//! Core checkpoint records for thread persistence and resumption
//!
//! This module defines the data types persisted by every [`CheckpointStore`]
//! backend: **[`Checkpoint`]**, **[`CheckpointStatus`]**, **[`StateView`]** and
//! **[`ThreadInfo`]**.
//!
//! # Overview
//!
//! A checkpoint is an immutable snapshot of one thread's state plus its position
//! in the graph, written after every node execution:
//!
//! - **Thread identity** - `thread_id` groups the checkpoints of one conversation
//! - **Step number** - strictly increasing per thread, `0` is the input checkpoint
//! - **Position** - the node that just ran (`node`) and the node to run next (`next`)
//! - **Status** - `Ready`, `Running`, `Suspended`, `Completed` or `Failed`
//! - **Payload** - the serialized workflow state plus any pending interrupt,
//!   error descriptor or terminal output
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Checkpoint                                              │
//! │  • v: 1                                                  │
//! │  • id: "uuid-abc"                                        │
//! │  • thread_id: "thread-42"        ┐                       │
//! │  • step: 3                       ┘ unique per store      │
//! │  • node: "validator"   (node that produced this step)    │
//! │  • next: "research"    (where execution continues)       │
//! │  • status: running                                       │
//! │  • state: { input, turns, fields, counters, output }     │
//! │  • interrupt / error / output: optional payloads         │
//! │  • metadata: { "loop_exhausted": true, ... }             │
//! │  • ts: 2024-01-01T12:00:00Z                              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Forward compatibility
//!
//! Every field except `thread_id`, `step`, `status` and `state` carries
//! `#[serde(default)]`, so documents written before a field existed still
//! deserialize. New optional fields must follow the same rule.
//!
//! [`CheckpointStore`]: crate::traits::CheckpointStore

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Execution status recorded with a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Input accepted, no node has run yet in this run
    Ready,
    /// At least one node ran and more remain
    Running,
    /// Paused waiting for an external response
    Suspended,
    /// Reached the terminal marker
    Completed,
    /// A node failed; the thread stays inspectable
    Failed,
}

impl CheckpointStatus {
    /// Whether no further node will run without a new submission
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckpointStatus::Completed | CheckpointStatus::Failed)
    }

    /// Whether a run was left in progress (e.g. the host stopped mid-run)
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CheckpointStatus::Ready | CheckpointStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Ready => "ready",
            CheckpointStatus::Running => "running",
            CheckpointStatus::Suspended => "suspended",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ready" => Ok(CheckpointStatus::Ready),
            "running" => Ok(CheckpointStatus::Running),
            "suspended" => Ok(CheckpointStatus::Suspended),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            other => Err(format!("unknown checkpoint status: {}", other)),
        }
    }
}

/// State snapshot of one thread at one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// The version of the checkpoint format (currently 1)
    #[serde(default = "Checkpoint::current_version")]
    pub v: i32,

    /// Unique ID of this checkpoint
    #[serde(default = "Checkpoint::fresh_id")]
    pub id: CheckpointId,

    /// Thread this checkpoint belongs to
    pub thread_id: String,

    /// Step number, strictly increasing within a thread
    pub step: u64,

    /// Node whose execution produced this checkpoint (`None` for input checkpoints)
    #[serde(default)]
    pub node: Option<String>,

    /// Node to execute next; for suspended threads, the paused node
    #[serde(default)]
    pub next: Option<String>,

    /// Execution status after this step
    pub status: CheckpointStatus,

    /// Serialized workflow state
    pub state: serde_json::Value,

    /// Pending interrupt request when `status` is `Suspended`
    #[serde(default)]
    pub interrupt: Option<serde_json::Value>,

    /// Structured error descriptor when `status` is `Failed`
    #[serde(default)]
    pub error: Option<serde_json::Value>,

    /// Terminal output when `status` is `Completed`
    #[serde(default)]
    pub output: Option<serde_json::Value>,

    /// Additional custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the checkpoint was created
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    fn current_version() -> i32 {
        Self::CURRENT_VERSION
    }

    fn fresh_id() -> CheckpointId {
        Uuid::new_v4().to_string()
    }

    /// Create a new checkpoint
    pub fn new(
        thread_id: impl Into<String>,
        step: u64,
        status: CheckpointStatus,
        state: serde_json::Value,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Self::fresh_id(),
            thread_id: thread_id.into(),
            step,
            node: None,
            next: None,
            status,
            state,
            interrupt: None,
            error: None,
            output: None,
            metadata: HashMap::new(),
            ts: Utc::now(),
        }
    }

    /// Set the node that produced this checkpoint
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Set the node to execute next
    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Attach a pending interrupt payload
    pub fn with_interrupt(mut self, interrupt: serde_json::Value) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Attach an error descriptor
    pub fn with_error(mut self, error: serde_json::Value) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach the terminal output
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Add custom metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read-only projection of this checkpoint's state
    pub fn view(&self) -> StateView {
        StateView {
            thread_id: self.thread_id.clone(),
            step: self.step,
            status: self.status,
            state: self.state.clone(),
            ts: self.ts,
        }
    }
}

/// Read-only projection of the latest state of a thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateView {
    pub thread_id: String,
    pub step: u64,
    pub status: CheckpointStatus,
    pub state: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Summary of one stored thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadInfo {
    pub thread_id: String,
    /// Timestamp of the thread's first checkpoint
    pub created_at: DateTime<Utc>,
    /// Timestamp of the thread's latest checkpoint
    pub updated_at: DateTime<Utc>,
    pub latest_step: u64,
    pub status: CheckpointStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = Checkpoint::new("thread-1", 0, CheckpointStatus::Ready, json!({}))
            .with_next("intake");

        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert_eq!(checkpoint.step, 0);
        assert_eq!(checkpoint.next.as_deref(), Some("intake"));
        assert!(checkpoint.node.is_none());
        assert!(!checkpoint.id.is_empty());
    }

    #[test]
    fn test_status_helpers() {
        assert!(CheckpointStatus::Completed.is_terminal());
        assert!(CheckpointStatus::Failed.is_terminal());
        assert!(!CheckpointStatus::Suspended.is_terminal());
        assert!(CheckpointStatus::Running.is_in_progress());
        assert!(CheckpointStatus::Ready.is_in_progress());

        for status in [
            CheckpointStatus::Ready,
            CheckpointStatus::Running,
            CheckpointStatus::Suspended,
            CheckpointStatus::Completed,
            CheckpointStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CheckpointStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_older_documents_deserialize() {
        // Written before node/next/interrupt/metadata existed
        let doc = json!({
            "thread_id": "legacy",
            "step": 4,
            "status": "completed",
            "state": {"input": {"q": "hi"}}
        });

        let checkpoint: Checkpoint = serde_json::from_value(doc).unwrap();
        assert_eq!(checkpoint.thread_id, "legacy");
        assert_eq!(checkpoint.step, 4);
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert!(checkpoint.metadata.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let doc = json!({
            "thread_id": "future",
            "step": 1,
            "status": "running",
            "state": {},
            "some_field_from_a_newer_release": [1, 2, 3]
        });

        let checkpoint: Checkpoint = serde_json::from_value(doc).unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Running);
    }

    #[test]
    fn test_view_projection() {
        let checkpoint = Checkpoint::new("t", 7, CheckpointStatus::Suspended, json!({"a": 1}));
        let view = checkpoint.view();

        assert_eq!(view.thread_id, "t");
        assert_eq!(view.step, 7);
        assert_eq!(view.status, CheckpointStatus::Suspended);
        assert_eq!(view.state, json!({"a": 1}));
    }
}
