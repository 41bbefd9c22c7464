//! Per-stage circuit breaker, long-lived across cycles.
//!
//! The breaker never raises; it answers a yes/no "may this stage attempt
//! execution this cycle" question and exposes its state for the health
//! record. Counters move once per cycle, driven by each stage's *final*
//! status for that cycle.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Breaker state for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Circuit {
    /// The stage runs normally.
    Closed,
    /// The stage is skipped except for one half-open probe per cycle.
    Open,
}

/// Per-stage counters and state.
///
/// Invariant: `circuit` is `Open` iff `consecutive_failures` reached the
/// open threshold and `consecutive_successes_since_open` has not yet
/// reached the reset threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Current breaker state.
    pub circuit: Circuit,
    /// Failed cycles in a row (reset to 0 on any successful cycle).
    pub consecutive_failures: u32,
    /// Successful probe cycles in a row since the breaker opened.
    pub consecutive_successes_since_open: u32,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            circuit: Circuit::Closed,
            consecutive_failures: 0,
            consecutive_successes_since_open: 0,
        }
    }
}

impl CircuitState {
    /// Returns true if the breaker is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.circuit, Circuit::Open)
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failed cycles before the breaker opens.
    pub open_threshold: u32,
    /// Consecutive successful probe cycles before an open breaker closes.
    pub reset_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            open_threshold: 3,
            reset_threshold: 5,
        }
    }
}

impl BreakerConfig {
    /// Creates the default thresholds (open at 3, reset at 5).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open threshold.
    #[must_use]
    pub fn with_open_threshold(mut self, threshold: u32) -> Self {
        self.open_threshold = threshold;
        self
    }

    /// Sets the reset threshold.
    #[must_use]
    pub fn with_reset_threshold(mut self, threshold: u32) -> Self {
        self.reset_threshold = threshold;
        self
    }
}

/// How the breaker admits a stage this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed: run normally, retry allowed.
    Normal,
    /// Circuit open: run one diagnostic probe, no retry.
    Probe,
}

/// Registry of per-stage circuit breakers, keyed by stage name.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: DashMap<String, CircuitState>,
}

impl CircuitBreaker {
    /// Creates a breaker registry with the given thresholds.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Answers whether the stage may run normally or only as a probe.
    #[must_use]
    pub fn admission(&self, stage: &str) -> Admission {
        let state = self.states.entry(stage.to_string()).or_default();
        if state.is_open() {
            Admission::Probe
        } else {
            Admission::Normal
        }
    }

    /// Records a successful (or partial) cycle-final outcome for a stage.
    pub fn record_success(&self, stage: &str) {
        let mut state = self.states.entry(stage.to_string()).or_default();
        match state.circuit {
            Circuit::Closed => {
                state.consecutive_failures = 0;
            }
            Circuit::Open => {
                state.consecutive_successes_since_open += 1;
                if state.consecutive_successes_since_open >= self.config.reset_threshold {
                    tracing::warn!(
                        stage = %stage,
                        probes = state.consecutive_successes_since_open,
                        "circuit closed after consecutive successful probes"
                    );
                    *state = CircuitState::default();
                }
            }
        }
    }

    /// Records a failed cycle-final outcome for a stage.
    ///
    /// A probe failure resets the success streak but does not re-open an
    /// already-open breaker.
    pub fn record_failure(&self, stage: &str) {
        let mut state = self.states.entry(stage.to_string()).or_default();
        match state.circuit {
            Circuit::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.open_threshold {
                    tracing::warn!(
                        stage = %stage,
                        failures = state.consecutive_failures,
                        "circuit opened after consecutive failed cycles"
                    );
                    state.circuit = Circuit::Open;
                    state.consecutive_successes_since_open = 0;
                }
            }
            Circuit::Open => {
                state.consecutive_successes_since_open = 0;
            }
        }
    }

    /// Replaces one stage's state wholesale.
    ///
    /// Used to rehydrate the registry from persisted health state after a
    /// process restart; the probe success streak starts over.
    pub fn restore(&self, stage: &str, state: CircuitState) {
        self.states.insert(stage.to_string(), state);
    }

    /// Returns the current state for one stage, if it has ever run.
    #[must_use]
    pub fn state(&self, stage: &str) -> Option<CircuitState> {
        self.states.get(stage).map(|s| *s)
    }

    /// Returns the names of all stages whose circuit is currently open.
    #[must_use]
    pub fn open_stages(&self) -> BTreeSet<String> {
        self.states
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Returns a snapshot of every stage's circuit state.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Returns the consecutive-failure count for one stage.
    #[must_use]
    pub fn consecutive_failures(&self, stage: &str) -> u32 {
        self.states
            .get(stage)
            .map_or(0, |s| s.consecutive_failures)
    }
}
