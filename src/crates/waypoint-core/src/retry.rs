//! Node-level retry with exponential backoff
//!
//! A [`RetryPolicy`] re-invokes a node executor when it fails with a
//! retryable [`NodeError`] (a transient failure or a timeout). Retries happen
//! inside a single step: the engine sees one invocation, and no checkpoint is
//! written between attempts.
//!
//! This is orthogonal to [`BoundedLoop`](crate::bounded_loop::BoundedLoop),
//! which repeats whole graph segments based on state and leaves a checkpoint
//! per pass.
//!
//! ```text
//!  attempt 0 ──fail(retryable)──► sleep(delay(0)) ──► attempt 1 ──fail──► sleep(delay(1)) ──► ...
//!      │                                                  │
//!      └── Ok / Interrupt / permanent error ──► returned  └── ... until max_attempts
//!
//!  delay(n) = min(initial_interval × backoff_factor^n, max_interval) × jitter(0.5..1.5)
//! ```
//!
//! ```rust
//! use std::time::Duration;
//! use waypoint_core::retry::{with_retry, RetryPolicy};
//! use waypoint_core::node::{executor_fn, NodeError, NodeOutput};
//! use waypoint_core::state::StateDelta;
//!
//! let flaky = executor_fn(|_state| async {
//!     Err::<NodeOutput, _>(NodeError::transient("search backend unavailable"))
//! });
//! let policy = RetryPolicy::new(3).with_initial_interval(0.05).with_jitter(false);
//! let executor = with_retry(policy, flaky);
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::node::{NodeError, NodeExecutor};

/// Configuration for retrying failed node executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-indexed)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether attempt number `attempts` (1-indexed, just failed with `error`) may be retried
    pub fn should_retry(&self, attempts: usize, error: &NodeError) -> bool {
        attempts < self.max_attempts && error.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Wrap an executor so retryable failures are re-attempted per `policy`.
///
/// Successful updates and interrupts are returned on first sight; only
/// `Err` results consult the policy.
pub fn with_retry(policy: RetryPolicy, executor: NodeExecutor) -> NodeExecutor {
    let policy = Arc::new(policy);
    Arc::new(move |state| {
        let policy = Arc::clone(&policy);
        let executor = Arc::clone(&executor);
        async move {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match executor(state.clone()).await {
                    Ok(output) => return Ok(output),
                    Err(error) if policy.should_retry(attempts, &error) => {
                        let delay = policy.calculate_delay(attempts - 1);
                        warn!(attempt = attempts, ?delay, error = %error, "Node attempt failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => {
                        debug!(attempts, error = %error, "Node failed, not retrying");
                        return Err(error);
                    }
                }
            }
        }
        .boxed()
    })
}
