//! Bounded loops: the only cycles a graph may contain
//!
//! A [`BoundedLoop`] declares a retry cycle together with the counter that
//! guarantees it terminates:
//!
//! ```text
//!            ┌──────────── retry (while retry_when && counter < max) ─┐
//!            ▼                                                          │
//!   ... ─► retry_to ─► ... ─► body ──(counter += 1)──► ... ─► gate ─────┤
//!                                                                       │
//!                                  exit (otherwise, counter cleared) ◄─┘
//!                                          │
//!                                          ▼
//!                                       exit_to
//! ```
//!
//! - The engine increments `counter` by exactly one each time `body` completes.
//! - `gate` routes back to `retry_to` only while `retry_when(state)` holds and
//!   the counter is below `max`. Reaching `max` forces the exit, so the body
//!   runs at most `max` times per loop entry.
//! - Exhaustion is a normal forward route, never an error. The checkpoint
//!   written by the gate carries `loop_exhausted: true` so callers can tell.
//! - Leaving the loop clears the counter, so a later run of the same thread
//!   starts from zero.
//!
//! ```rust
//! use waypoint_core::bounded_loop::BoundedLoop;
//!
//! let retry = BoundedLoop::new("attempts", 3)
//!     .body("work")
//!     .gate("gate")
//!     .exit_to("finish")
//!     .retry_when(|state| state.field_str("verdict") != Some("ok"));
//! ```

use std::sync::Arc;

use crate::node::NodeId;
use crate::state::State;

/// Predicate deciding whether another pass is wanted
pub type LoopPredicate = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// A counter-guarded retry cycle
#[derive(Clone)]
pub struct BoundedLoop {
    pub counter: String,
    pub max: u32,
    pub body: Option<NodeId>,
    pub gate: Option<NodeId>,
    /// Where a retry re-enters the loop; the body when unset
    pub retry_to: Option<NodeId>,
    pub exit_to: Option<NodeId>,
    retry_when: Option<LoopPredicate>,
}

/// Outcome of evaluating a loop gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopDecision {
    /// Loop back for another pass
    Retry { target: NodeId, pass: u32 },
    /// Leave the loop; `exhausted` when the maximum forced the exit
    Exit { target: NodeId, exhausted: bool },
}

impl LoopDecision {
    pub fn target(&self) -> &str {
        match self {
            LoopDecision::Retry { target, .. } | LoopDecision::Exit { target, .. } => target,
        }
    }
}

impl BoundedLoop {
    pub fn new(counter: impl Into<String>, max: u32) -> Self {
        Self {
            counter: counter.into(),
            max,
            body: None,
            gate: None,
            retry_to: None,
            exit_to: None,
            retry_when: None,
        }
    }

    pub fn body(mut self, node: impl Into<NodeId>) -> Self {
        self.body = Some(node.into());
        self
    }

    pub fn gate(mut self, node: impl Into<NodeId>) -> Self {
        self.gate = Some(node.into());
        self
    }

    pub fn retry_to(mut self, node: impl Into<NodeId>) -> Self {
        self.retry_to = Some(node.into());
        self
    }

    pub fn exit_to(mut self, node: impl Into<NodeId>) -> Self {
        self.exit_to = Some(node.into());
        self
    }

    /// Quality predicate; without one the loop retries until exhausted
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        self.retry_when = Some(Arc::new(predicate));
        self
    }

    /// Re-entry node for a retry
    pub fn retry_target(&self) -> Option<&str> {
        self.retry_to.as_deref().or(self.body.as_deref())
    }

    /// Evaluate the gate against the state produced by the gate node.
    ///
    /// Callers must have validated the loop; unset targets resolve to an empty id.
    pub fn decide(&self, state: &State) -> LoopDecision {
        let passes = state.counter(&self.counter);
        let wants_retry = self.retry_when.as_ref().map_or(true, |pred| pred(state));

        if wants_retry && passes < self.max {
            LoopDecision::Retry {
                target: self.retry_target().unwrap_or_default().to_string(),
                pass: passes + 1,
            }
        } else {
            LoopDecision::Exit {
                target: self.exit_to.clone().unwrap_or_default(),
                exhausted: wants_retry,
            }
        }
    }

    /// Check the loop's own parameters (graph-level checks live in the graph)
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.counter.is_empty() {
            return Err("bounded loop requires a counter name".to_string());
        }
        if self.max == 0 {
            return Err(format!("bounded loop '{}' must allow at least one pass", self.counter));
        }
        for (role, node) in [("body", &self.body), ("gate", &self.gate), ("exit", &self.exit_to)] {
            if node.is_none() {
                return Err(format!("bounded loop '{}' has no {} node", self.counter, role));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoundedLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedLoop")
            .field("counter", &self.counter)
            .field("max", &self.max)
            .field("body", &self.body)
            .field("gate", &self.gate)
            .field("retry_to", &self.retry_to)
            .field("exit_to", &self.exit_to)
            .field("retry_when", &self.retry_when.as_ref().map(|_| "<function>"))
            .finish()
    }
}
