//! Scheduling ports: cycle trigger and maintenance window.
//!
//! The orchestrator treats both as injected configuration. Tests replace
//! the interval trigger with a manual one that fires cycles on demand.

use crate::core::StageOutcome;
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Trigger source the orchestrator awaits between cycles.
#[async_trait]
pub trait CycleSchedule: Send + Sync {
    /// Completes when the next cycle should start.
    async fn next_tick(&self);
}

/// Fixed inter-cycle interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSchedule {
    interval: Duration,
}

impl IntervalSchedule {
    /// Creates a schedule firing every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl CycleSchedule for IntervalSchedule {
    async fn next_tick(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Fires a cycle each time [`fire`](Self::fire) is called.
///
/// At most one pending tick is stored, matching the single-run-loop model.
#[derive(Debug, Default)]
pub struct ManualSchedule {
    notify: Notify,
}

impl ManualSchedule {
    /// Creates a manual schedule with no pending tick.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests one cycle.
    pub fn fire(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl CycleSchedule for ManualSchedule {
    async fn next_tick(&self) {
        self.notify.notified().await;
    }
}

/// Schedule predicate for the maintenance stage.
///
/// Maintenance is a daily-frequency stage, not an every-cycle one; on
/// cycles where the predicate is false it is recorded as skipped with a
/// non-error reason.
pub trait MaintenanceWindow: Send + Sync {
    /// Returns true if maintenance should run at the given time.
    fn is_due(&self, now: DateTime<Utc>) -> bool;

    /// Notes that maintenance ran at the given time.
    fn mark_ran(&self, _now: DateTime<Utc>) {}
}

/// Maintenance runs every cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EveryCycle;

impl MaintenanceWindow for EveryCycle {
    fn is_due(&self, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Maintenance runs at most once per UTC day, after a given hour.
#[derive(Debug)]
pub struct DailyAfterHour {
    after_hour: u32,
    last_ran: Mutex<Option<NaiveDate>>,
}

impl DailyAfterHour {
    /// Creates a window opening daily at the given UTC hour (0-23).
    #[must_use]
    pub fn new(after_hour: u32) -> Self {
        Self {
            after_hour: after_hour.min(23),
            last_ran: Mutex::new(None),
        }
    }
}

impl MaintenanceWindow for DailyAfterHour {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.hour() >= self.after_hour && *self.last_ran.lock() != Some(now.date_naive())
    }

    fn mark_ran(&self, now: DateTime<Utc>) {
        *self.last_ran.lock() = Some(now.date_naive());
    }
}

/// Wraps a stage so it only executes inside its schedule window.
///
/// Outside the window it reports a skip, which carries no breaker signal
/// and does not degrade the cycle.
pub struct GatedStage {
    inner: Arc<dyn Stage>,
    window: Arc<dyn MaintenanceWindow>,
}

impl GatedStage {
    /// Wraps `inner` behind the given window.
    #[must_use]
    pub fn new(inner: Arc<dyn Stage>, window: Arc<dyn MaintenanceWindow>) -> Self {
        Self { inner, window }
    }
}

impl std::fmt::Debug for GatedStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatedStage")
            .field("inner", &self.inner.name())
            .finish()
    }
}

#[async_trait]
impl Stage for GatedStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        let now = Utc::now();
        if !self.window.is_due(now) {
            return StageOutcome::skip("outside maintenance window");
        }
        let outcome = self.inner.run(ctx).await;
        if outcome.produced_output() {
            self.window.mark_ran(now);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use crate::stages::StaticStage;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_window_respects_hour() {
        let window = DailyAfterHour::new(2);
        assert!(!window.is_due(at(1)));
        assert!(window.is_due(at(2)));
        assert!(window.is_due(at(23)));
    }

    #[test]
    fn test_daily_window_runs_once_per_day() {
        let window = DailyAfterHour::new(2);
        let now = at(3);

        assert!(window.is_due(now));
        window.mark_ran(now);
        assert!(!window.is_due(now));
        assert!(!window.is_due(at(22)));

        // Next day opens again
        let tomorrow = Utc.with_ymd_and_hms(2026, 8, 7, 3, 0, 0).unwrap();
        assert!(window.is_due(tomorrow));
    }

    #[tokio::test]
    async fn test_gated_stage_skips_outside_window() {
        #[derive(Debug)]
        struct Shut;
        impl MaintenanceWindow for Shut {
            fn is_due(&self, _now: DateTime<Utc>) -> bool {
                false
            }
        }

        let stage = GatedStage::new(
            Arc::new(StaticStage::new("maintenance", StageOutcome::success(1))),
            Arc::new(Shut),
        );
        let ctx = StageContext::new(Uuid::now_v7(), BTreeMap::new());

        let outcome = stage.run(&ctx).await;
        assert_eq!(outcome.status(), JobStatus::Skipped);
        assert!(outcome.note().unwrap().contains("maintenance window"));
    }

    #[tokio::test]
    async fn test_gated_stage_runs_inside_window() {
        let stage = GatedStage::new(
            Arc::new(StaticStage::new("maintenance", StageOutcome::success(7))),
            Arc::new(EveryCycle),
        );
        let ctx = StageContext::new(Uuid::now_v7(), BTreeMap::new());

        let outcome = stage.run(&ctx).await;
        assert_eq!(outcome.status(), JobStatus::Success);
        assert_eq!(outcome.items_processed(), 7);
    }

    #[tokio::test]
    async fn test_manual_schedule_fires_on_demand() {
        let schedule = ManualSchedule::new();
        schedule.fire();
        // Pending tick is consumed without waiting
        schedule.next_tick().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_schedule_waits() {
        let schedule = IntervalSchedule::new(Duration::from_secs(60));
        let start = tokio::time::Instant::now();
        schedule.next_tick().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
