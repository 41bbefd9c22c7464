//! Pipeline execution and upstream-state computation.

use super::{DegradePolicy, StageSpec};
use crate::core::{JobResult, JobStatus, UpstreamState};
use crate::errors::{BookkeepingError, PipelineValidationError};
use crate::health::HealthMonitor;
use crate::runner::JobRunner;
use crate::stages::StageContext;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// The outcome of one pipeline pass.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// One result per stage, in execution order.
    pub jobs: Vec<JobResult>,
    /// True if any stage failed, probed, ran partial, or ran against
    /// non-fresh upstream data.
    pub degraded: bool,
}

impl PipelineRun {
    /// Looks up a job result by stage name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job_name == name)
    }
}

/// An ordered, validated list of stage specs.
///
/// Declaration order is execution order; validation requires every
/// dependency to be declared earlier in the list, which also rules out
/// dependency cycles.
#[derive(Debug)]
pub struct StagePipeline {
    name: String,
    stages: Vec<StageSpec>,
}

impl StagePipeline {
    /// Creates a validated pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty pipeline name, duplicate stage names,
    /// self-dependencies, or a dependency that is not declared earlier in
    /// the list.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<StageSpec>,
    ) -> Result<Self, PipelineValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for spec in &stages {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage name '{}'",
                    spec.name
                ))
                .with_stages(vec![spec.name.clone()]));
            }
            for dep in &spec.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' depends on '{}', which is not declared before it",
                        spec.name, dep
                    ))
                    .with_stages(vec![spec.name.clone(), dep.clone()]));
                }
            }
        }

        Ok(Self { name, stages })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Executes every stage in order, applying the degradation policy
    /// between stages.
    ///
    /// Each stage outcome is recorded with the health monitor before the
    /// next stage starts, so downstream upstream-state computation sees
    /// current last-known-good data.
    ///
    /// # Errors
    ///
    /// Only bookkeeping failures (health persistence) surface as `Err`;
    /// stage failures become data in the returned [`PipelineRun`].
    pub async fn execute(
        &self,
        runner: &JobRunner,
        monitor: &HealthMonitor,
        cycle_id: Uuid,
    ) -> Result<PipelineRun, BookkeepingError> {
        let mut jobs: Vec<JobResult> = Vec::with_capacity(self.stages.len());
        let mut degraded = false;

        for spec in &self.stages {
            let upstream = self.upstream_map(spec, &jobs, monitor);
            let upstream_degraded = upstream.values().any(|s| !s.is_fresh());

            let job = if spec.degrade == DegradePolicy::SkipOnStale && upstream_degraded {
                let stale: Vec<&str> = upstream
                    .iter()
                    .filter(|(_, s)| !s.is_fresh())
                    .map(|(n, _)| n.as_str())
                    .collect();
                tracing::info!(
                    pipeline = %self.name,
                    stage = %spec.name,
                    upstream = ?stale,
                    "skipping stage, upstream not fresh"
                );
                JobResult::skipped(
                    &spec.name,
                    format!("upstream not fresh: {}", stale.join(", ")),
                )
            } else {
                let ctx = StageContext::new(cycle_id, upstream);
                runner.run(spec, ctx).await
            };

            degraded |= job.is_failure()
                || job.probe
                || job.status == JobStatus::Partial
                || upstream_degraded;

            tracing::debug!(
                pipeline = %self.name,
                stage = %job.job_name,
                status = %job.status,
                items = job.items_processed,
                duration_ms = job.duration_ms(),
                "stage finished"
            );

            monitor.record_job(&job).await?;
            jobs.push(job);
        }

        Ok(PipelineRun { jobs, degraded })
    }

    /// Computes the freshness tag for each of the stage's dependencies.
    ///
    /// Derived purely from this cycle's job results plus the health
    /// record's last-known-good per stage.
    fn upstream_map(
        &self,
        spec: &StageSpec,
        jobs: &[JobResult],
        monitor: &HealthMonitor,
    ) -> BTreeMap<String, UpstreamState> {
        spec.depends_on
            .iter()
            .map(|dep| {
                let ran_fresh = jobs
                    .iter()
                    .find(|j| &j.job_name == dep)
                    .is_some_and(|j| j.status == JobStatus::Success);
                let state = if ran_fresh {
                    UpstreamState::Fresh
                } else if monitor.last_success(dep).is_some() {
                    UpstreamState::Stale
                } else {
                    UpstreamState::Absent
                };
                (dep.clone(), state)
            })
            .collect()
    }
}
