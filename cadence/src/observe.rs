//! Observability port: one structured record per cycle.
//!
//! Operators observe failures exclusively through cycle results and the
//! health record; the core emits exactly one [`CycleResult`] per cycle and
//! formats no metrics text itself.

use crate::core::CycleResult;
use async_trait::async_trait;

/// Installs a global tracing subscriber with `RUST_LOG`-style filtering.
///
/// Convenience for embedding binaries; does nothing if a subscriber is
/// already installed.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Trait for sinks that receive each finalized cycle result.
#[async_trait]
pub trait CycleSink: Send + Sync {
    /// Receives a finalized cycle result.
    ///
    /// Must not fail; sink-side problems are the sink's to log and swallow.
    async fn publish(&self, cycle: &CycleResult);
}

/// A sink that discards all cycle results.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCycleSink;

#[async_trait]
impl CycleSink for NoOpCycleSink {
    async fn publish(&self, _cycle: &CycleResult) {
        // Intentionally empty - discards all results
    }
}

/// A sink that logs each cycle through the tracing framework.
///
/// Healthy cycles log at info, degraded cycles at warn, so a stuck circuit
/// and a bad run are both visible without parsing payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCycleSink;

impl LoggingCycleSink {
    /// Creates a new logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn summary(cycle: &CycleResult) -> String {
        cycle
            .jobs
            .iter()
            .map(|j| format!("{}={}", j.job_name, j.status))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl CycleSink for LoggingCycleSink {
    async fn publish(&self, cycle: &CycleResult) {
        let duration_ms = cycle
            .duration()
            .map_or(0.0, |d| d.num_milliseconds() as f64);
        let summary = Self::summary(cycle);

        if cycle.healthy() && !cycle.degraded {
            tracing::info!(
                cycle_id = %cycle.cycle_id,
                duration_ms,
                jobs = %summary,
                "cycle finished healthy"
            );
        } else {
            tracing::warn!(
                cycle_id = %cycle.cycle_id,
                duration_ms,
                healthy = cycle.healthy(),
                degraded = cycle.degraded,
                jobs = %summary,
                "cycle finished degraded"
            );
        }
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingCycleSink {
    cycles: parking_lot::RwLock<Vec<CycleResult>>,
}

impl CollectingCycleSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected cycle results.
    #[must_use]
    pub fn cycles(&self) -> Vec<CycleResult> {
        self.cycles.read().clone()
    }

    /// Returns the number of collected results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cycles.read().len()
    }

    /// Returns true if no results have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cycles.read().is_empty()
    }
}

#[async_trait]
impl CycleSink for CollectingCycleSink {
    async fn publish(&self, cycle: &CycleResult) {
        self.cycles.write().push(cycle.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobResult, StageOutcome};
    use chrono::Utc;

    fn finished_cycle() -> CycleResult {
        let mut cycle = CycleResult::begin();
        cycle.push_job(JobResult::from_outcome(
            "collect",
            &StageOutcome::success(2),
            Utc::now(),
            1,
        ));
        cycle.finalize();
        cycle
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingCycleSink::new();
        assert!(sink.is_empty());

        let cycle = finished_cycle();
        sink.publish(&cycle).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.cycles()[0].cycle_id, cycle.cycle_id);
    }

    #[tokio::test]
    async fn test_noop_sink_discards() {
        let sink = NoOpCycleSink;
        sink.publish(&finished_cycle()).await;
    }

    #[test]
    fn test_logging_summary_format() {
        let cycle = finished_cycle();
        assert_eq!(LoggingCycleSink::summary(&cycle), "collect=success");
    }
}
