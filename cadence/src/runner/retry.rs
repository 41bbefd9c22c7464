//! Retry policy: one bounded retry per cycle at a fixed delay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for per-cycle retry behavior.
///
/// The contract for this system is exactly one retry at a fixed delay,
/// regardless of error type — retry exemption, if any, is a stage-level
/// concern. After the retry also fails, the stage is recorded as a
/// same-cycle failure rather than looping again within the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed delay before each retry, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy (one retry, 30 second delay).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the fixed retry delay.
    #[must_use]
    pub fn with_delay_ms(mut self, delay: u64) -> Self {
        self.delay_ms = delay;
        self
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    /// Returns the fixed retry delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Decides whether the given failed attempt may be retried.
    ///
    /// `attempt` is 1-indexed: after the first attempt fails, `attempt` is 1.
    /// The triggering error is deliberately not inspected — no error is
    /// retry-exempt at this layer.
    #[must_use]
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt <= self.max_retries {
            RetryDecision::Retry(self.delay())
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries; record the failure for this cycle.
    GiveUp,
}

impl RetryDecision {
    /// Returns true if another attempt was granted.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}
