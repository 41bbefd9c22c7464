//! The truth sub-pipeline, exposed to the outer cycle as one stage.

use super::names;
use crate::core::{JobResult, JobStatus, StageOutcome};
use crate::errors::PipelineValidationError;
use crate::health::HealthMonitor;
use crate::pipeline::{StagePipeline, StageSpec};
use crate::runner::JobRunner;
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// A pipeline of exactly four truth stages in fixed dependency order:
/// time → commitment → capacity → client-health.
///
/// Capacity depends on time; commitment is independent of both but
/// precedes client-health; client-health depends on all three.
///
/// The composite status is derived from the children: success if all four
/// succeeded, failed only if all four failed, partial otherwise. Child
/// results are retained and surfaced in the cycle record, not collapsed
/// away.
pub struct TruthCycle {
    pipeline: StagePipeline,
    runner: Arc<JobRunner>,
    monitor: Arc<HealthMonitor>,
    last_children: Mutex<Vec<JobResult>>,
}

impl TruthCycle {
    /// Wires the four truth stages into the fixed sub-pipeline.
    pub fn new(
        time: Arc<dyn Stage>,
        commitment: Arc<dyn Stage>,
        capacity: Arc<dyn Stage>,
        client_health: Arc<dyn Stage>,
        runner: Arc<JobRunner>,
        monitor: Arc<HealthMonitor>,
    ) -> Result<Self, PipelineValidationError> {
        let stages = vec![
            StageSpec::new(names::TIME, time),
            StageSpec::new(names::COMMITMENT, commitment),
            StageSpec::new(names::CAPACITY, capacity).with_dependency(names::TIME),
            StageSpec::new(names::CLIENT_HEALTH, client_health).with_depends_on([
                names::TIME,
                names::COMMITMENT,
                names::CAPACITY,
            ]),
        ];

        Ok(Self {
            pipeline: StagePipeline::new(names::TRUTH, stages)?,
            runner,
            monitor,
            last_children: Mutex::new(Vec::new()),
        })
    }

    /// Drains the child results of the most recent run.
    ///
    /// Called by the orchestrator after the outer pipeline finishes, so the
    /// cycle record surfaces per-stage truth results.
    #[must_use]
    pub fn take_child_results(&self) -> Vec<JobResult> {
        std::mem::take(&mut *self.last_children.lock())
    }
}

impl std::fmt::Debug for TruthCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TruthCycle")
            .field("stages", &self.pipeline.stage_names())
            .finish()
    }
}

#[async_trait]
impl Stage for TruthCycle {
    fn name(&self) -> &str {
        names::TRUTH
    }

    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        let run = match self
            .pipeline
            .execute(&self.runner, &self.monitor, ctx.cycle_id)
            .await
        {
            Ok(run) => run,
            // The broken store will also fail the outer pipeline's next
            // record, which is where the fatal error surfaces.
            Err(e) => {
                tracing::error!(error = %e, "truth sub-pipeline bookkeeping failed");
                return StageOutcome::error(format!("truth bookkeeping failed: {e}"));
            }
        };

        let total = run.jobs.len();
        let succeeded = run
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Success)
            .count();
        let failed = run.jobs.iter().filter(|j| j.is_failure()).count();
        let items: u64 = run.jobs.iter().map(|j| j.items_processed).sum();
        let detail = run
            .jobs
            .iter()
            .filter(|j| j.status != JobStatus::Success)
            .map(|j| format!("{}={}", j.job_name, j.status))
            .collect::<Vec<_>>()
            .join(" ");

        *self.last_children.lock() = run.jobs;

        if failed == total {
            StageOutcome::error("all truth stages failed")
        } else if succeeded == total {
            StageOutcome::success(items)
        } else {
            StageOutcome::partial(items, format!("degraded truth stages: {detail}"))
        }
    }
}
