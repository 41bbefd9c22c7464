//! Orchestrator configuration.
//!
//! Everything time- or threshold-shaped is injected through this struct
//! rather than hardcoded, so tests can shrink delays and embedders can tune
//! cadence without touching orchestration code.

use crate::breaker::BreakerConfig;
use crate::runner::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the cycle orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-cycle retry policy applied uniformly to every stage.
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Default timeout for one stage attempt, in milliseconds.
    ///
    /// A stage exceeding it is treated identically to a raised error;
    /// individual stages may override it in their spec.
    pub stage_timeout_ms: u64,
    /// Interval between cycle starts for the default schedule, in milliseconds.
    pub cycle_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            stage_timeout_ms: 300_000,
            cycle_interval_ms: 900_000,
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the breaker thresholds.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the default per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout: u64) -> Self {
        self.stage_timeout_ms = timeout;
        self
    }

    /// Sets the inter-cycle interval.
    #[must_use]
    pub fn with_cycle_interval_ms(mut self, interval: u64) -> Self {
        self.cycle_interval_ms = interval;
        self
    }

    /// Returns the default per-stage timeout.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Returns the inter-cycle interval.
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.breaker.open_threshold, 3);
        assert_eq!(config.stage_timeout(), Duration::from_secs(300));
        assert_eq!(config.cycle_interval(), Duration::from_secs(900));
    }

    #[test]
    fn test_builder_setters() {
        let config = OrchestratorConfig::new()
            .with_retry(RetryPolicy::none())
            .with_stage_timeout_ms(1_000)
            .with_cycle_interval_ms(60_000);

        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.stage_timeout(), Duration::from_secs(1));
        assert_eq!(config.cycle_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_serialization() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
