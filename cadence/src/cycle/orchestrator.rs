//! The top-level cycle orchestrator and its unattended run loop.

use super::names;
use super::truth::TruthCycle;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::OrchestratorConfig;
use crate::core::CycleResult;
use crate::errors::{OrchestratorError, PipelineValidationError};
use crate::health::{HealthMonitor, HealthState, HealthStore, MemoryHealthStore};
use crate::observe::{CycleSink, LoggingCycleSink};
use crate::pipeline::{StagePipeline, StageSpec};
use crate::runner::JobRunner;
use crate::sched::{CycleSchedule, EveryCycle, GatedStage, IntervalSchedule, MaintenanceWindow};
use crate::shutdown::ShutdownToken;
use crate::stages::Stage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The orchestrator's per-cycle state machine.
///
/// `Degraded` is a per-cycle annotation, not a sticky state: the loop
/// returns to `Idle` unconditionally before the next tick. Stickiness
/// lives in the health record's counters and circuit sets instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    /// Waiting for the next scheduled tick.
    Idle,
    /// A cycle is in flight.
    Running,
    /// The last cycle finished with every stage healthy and fresh.
    Healthy,
    /// The last cycle finished unhealthy or on degraded data.
    Degraded,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Runs the top-level pipeline collect → truth → snapshot → notify →
/// maintenance, one cycle at a time, forever.
///
/// No stage outcome terminates the process. The only way the orchestrator
/// halts is an unrecoverable error in its own bookkeeping (inability to
/// persist health state), surfaced loudly as
/// [`OrchestratorError::Bookkeeping`].
pub struct CycleOrchestrator {
    pipeline: StagePipeline,
    truth: Arc<TruthCycle>,
    runner: Arc<JobRunner>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<HealthMonitor>,
    sink: Arc<dyn CycleSink>,
    schedule: Arc<dyn CycleSchedule>,
    shutdown: ShutdownToken,
    run_lock: tokio::sync::Mutex<()>,
    phase: RwLock<OrchestratorPhase>,
}

impl CycleOrchestrator {
    /// Returns a builder for wiring stages and collaborators.
    #[must_use]
    pub fn builder() -> CycleOrchestratorBuilder {
        CycleOrchestratorBuilder::new()
    }

    /// Returns a snapshot of the current health state.
    #[must_use]
    pub fn health(&self) -> HealthState {
        self.monitor.health()
    }

    /// Returns a snapshot of every stage's circuit state.
    #[must_use]
    pub fn circuit_states(&self) -> BTreeMap<String, CircuitState> {
        self.breaker.snapshot()
    }

    /// Returns the current run-loop phase.
    #[must_use]
    pub fn phase(&self) -> OrchestratorPhase {
        *self.phase.read()
    }

    /// Returns a handle for requesting graceful shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Runs one complete cycle and returns its finalized record.
    ///
    /// Cycles are serialized: if another cycle is in flight, this call
    /// waits for it to finish before starting.
    ///
    /// # Errors
    ///
    /// Only bookkeeping failures surface as `Err`; every stage-level
    /// failure is recorded in the returned [`CycleResult`].
    pub async fn run_cycle(&self) -> Result<CycleResult, OrchestratorError> {
        let _guard = self.run_lock.lock().await;
        *self.phase.write() = OrchestratorPhase::Running;

        let mut cycle = CycleResult::begin();
        tracing::info!(cycle_id = %cycle.cycle_id, "cycle started");

        let run = match self
            .pipeline
            .execute(&self.runner, &self.monitor, cycle.cycle_id)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(
                    cycle_id = %cycle.cycle_id,
                    error = %e,
                    "fatal bookkeeping failure, halting cycle"
                );
                *self.phase.write() = OrchestratorPhase::Degraded;
                return Err(e.into());
            }
        };

        cycle.jobs = run.jobs;
        cycle.truth_jobs = self.truth.take_child_results();
        cycle.degraded = run.degraded;
        cycle.finalize();

        if let Err(e) = self.monitor.finish_cycle(&cycle).await {
            tracing::error!(
                cycle_id = %cycle.cycle_id,
                error = %e,
                "fatal bookkeeping failure while finalizing cycle"
            );
            *self.phase.write() = OrchestratorPhase::Degraded;
            return Err(e.into());
        }

        let phase = if cycle.healthy() && !cycle.degraded {
            OrchestratorPhase::Healthy
        } else {
            OrchestratorPhase::Degraded
        };
        *self.phase.write() = phase;

        self.sink.publish(&cycle).await;

        tracing::debug!(
            cycle_id = %cycle.cycle_id,
            phase = %phase,
            healthy = cycle.healthy(),
            "cycle finished"
        );

        Ok(cycle)
    }

    /// The unattended run loop: awaits the schedule, runs one cycle at a
    /// time, and returns when shutdown is requested.
    ///
    /// The inter-cycle wait is the loop's sole intentional suspension
    /// point; a shutdown request interrupts it promptly.
    ///
    /// # Errors
    ///
    /// Returns the fatal bookkeeping error that halted the loop, if any.
    pub async fn run_until_shutdown(&self) -> Result<(), OrchestratorError> {
        tracing::info!(
            stages = ?self.pipeline.stage_names(),
            durable_health = self.monitor.durable(),
            "orchestrator run loop started"
        );

        loop {
            *self.phase.write() = OrchestratorPhase::Idle;
            tokio::select! {
                () = self.shutdown.wait() => break,
                () = self.schedule.next_tick() => {}
            }
            if self.shutdown.is_shutdown() {
                break;
            }
            self.run_cycle().await?;
        }

        *self.phase.write() = OrchestratorPhase::Idle;
        tracing::info!(reason = ?self.shutdown.reason(), "orchestrator run loop stopped");
        Ok(())
    }
}

impl fmt::Debug for CycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleOrchestrator")
            .field("stages", &self.pipeline.stage_names())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Builder for [`CycleOrchestrator`].
#[derive(Default)]
pub struct CycleOrchestratorBuilder {
    config: OrchestratorConfig,
    collect: Option<Arc<dyn Stage>>,
    time: Option<Arc<dyn Stage>>,
    commitment: Option<Arc<dyn Stage>>,
    capacity: Option<Arc<dyn Stage>>,
    client_health: Option<Arc<dyn Stage>>,
    snapshot: Option<Arc<dyn Stage>>,
    notify: Option<Arc<dyn Stage>>,
    maintenance: Option<Arc<dyn Stage>>,
    maintenance_window: Option<Arc<dyn MaintenanceWindow>>,
    store: Option<Arc<dyn HealthStore>>,
    sink: Option<Arc<dyn CycleSink>>,
    schedule: Option<Arc<dyn CycleSchedule>>,
    shutdown: Option<ShutdownToken>,
}

impl CycleOrchestratorBuilder {
    /// Creates an empty builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the orchestrator configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the collect stage.
    #[must_use]
    pub fn collect(mut self, stage: Arc<dyn Stage>) -> Self {
        self.collect = Some(stage);
        self
    }

    /// Sets the four truth sub-stages in their fixed order.
    #[must_use]
    pub fn truth_stages(
        mut self,
        time: Arc<dyn Stage>,
        commitment: Arc<dyn Stage>,
        capacity: Arc<dyn Stage>,
        client_health: Arc<dyn Stage>,
    ) -> Self {
        self.time = Some(time);
        self.commitment = Some(commitment);
        self.capacity = Some(capacity);
        self.client_health = Some(client_health);
        self
    }

    /// Sets the snapshot stage.
    #[must_use]
    pub fn snapshot(mut self, stage: Arc<dyn Stage>) -> Self {
        self.snapshot = Some(stage);
        self
    }

    /// Sets the notify stage.
    #[must_use]
    pub fn notify(mut self, stage: Arc<dyn Stage>) -> Self {
        self.notify = Some(stage);
        self
    }

    /// Sets the maintenance stage and its schedule window.
    #[must_use]
    pub fn maintenance(
        mut self,
        stage: Arc<dyn Stage>,
        window: Arc<dyn MaintenanceWindow>,
    ) -> Self {
        self.maintenance = Some(stage);
        self.maintenance_window = Some(window);
        self
    }

    /// Sets the health state store.
    #[must_use]
    pub fn health_store(mut self, store: Arc<dyn HealthStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the cycle result sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn CycleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the cycle schedule.
    #[must_use]
    pub fn schedule(mut self, schedule: Arc<dyn CycleSchedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Sets the shutdown token.
    #[must_use]
    pub fn shutdown(mut self, token: ShutdownToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Wires everything together and loads persisted health state.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a required stage is missing, or a
    /// bookkeeping error if the health store fails to load.
    pub async fn build(self) -> Result<CycleOrchestrator, OrchestratorError> {
        let config = self.config;
        let shutdown = self.shutdown.unwrap_or_default();

        let collect = required(self.collect, names::COLLECT)?;
        let time = required(self.time, names::TIME)?;
        let commitment = required(self.commitment, names::COMMITMENT)?;
        let capacity = required(self.capacity, names::CAPACITY)?;
        let client_health = required(self.client_health, names::CLIENT_HEALTH)?;
        let snapshot = required(self.snapshot, names::SNAPSHOT)?;
        let notify = required(self.notify, names::NOTIFY)?;
        let maintenance = required(self.maintenance, names::MAINTENANCE)?;
        let window = self
            .maintenance_window
            .unwrap_or_else(|| Arc::new(EveryCycle));

        let store: Arc<dyn HealthStore> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryHealthStore::new()));
        if !store.durable() {
            tracing::warn!(
                "health state store is not durable: failure history and circuit \
                 state reset on process restart"
            );
        }

        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        let runner = Arc::new(JobRunner::new(
            breaker.clone(),
            config.retry,
            config.stage_timeout(),
            shutdown.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(store, breaker.clone()));
        monitor.load().await.map_err(OrchestratorError::Bookkeeping)?;

        let truth = Arc::new(TruthCycle::new(
            time,
            commitment,
            capacity,
            client_health,
            runner.clone(),
            monitor.clone(),
        )?);

        let gated_maintenance: Arc<dyn Stage> = Arc::new(GatedStage::new(maintenance, window));
        let truth_stage: Arc<dyn Stage> = truth.clone();

        let stages = vec![
            StageSpec::new(names::COLLECT, collect),
            StageSpec::new(names::TRUTH, truth_stage).with_dependency(names::COLLECT),
            StageSpec::new(names::SNAPSHOT, snapshot).with_dependency(names::TRUTH),
            StageSpec::new(names::NOTIFY, notify).with_dependency(names::SNAPSHOT),
            StageSpec::new(names::MAINTENANCE, gated_maintenance),
        ];
        let pipeline = StagePipeline::new("cycle", stages)?;

        let schedule = self
            .schedule
            .unwrap_or_else(|| Arc::new(IntervalSchedule::new(config.cycle_interval())));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(LoggingCycleSink::new()));

        Ok(CycleOrchestrator {
            pipeline,
            truth,
            runner,
            breaker,
            monitor,
            sink,
            schedule,
            shutdown,
            run_lock: tokio::sync::Mutex::new(()),
            phase: RwLock::new(OrchestratorPhase::Idle),
        })
    }
}

fn required(
    stage: Option<Arc<dyn Stage>>,
    name: &str,
) -> Result<Arc<dyn Stage>, PipelineValidationError> {
    stage.ok_or_else(|| {
        PipelineValidationError::new(format!("Missing stage '{name}'"))
            .with_stages(vec![name.to_string()])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(OrchestratorPhase::Idle.to_string(), "idle");
        assert_eq!(OrchestratorPhase::Running.to_string(), "running");
        assert_eq!(OrchestratorPhase::Healthy.to_string(), "healthy");
        assert_eq!(OrchestratorPhase::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_build_rejects_missing_stage() {
        let result = CycleOrchestrator::builder().build().await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }
}
