//! Immutable run records: one per stage execution, one per cycle.

use super::{JobStatus, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The recorded outcome of one stage execution within one cycle.
///
/// Created by the runner at the end of the final attempt; immutable once
/// produced; owned by the [`CycleResult`] that contains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// The stage name.
    pub job_name: String,
    /// The final status for this cycle.
    pub status: JobStatus,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the final attempt ended.
    pub finished_at: DateTime<Utc>,
    /// How many attempts were made (1 or 2; 0 for skips without execution).
    pub attempts: u32,
    /// Number of items the stage processed.
    pub items_processed: u64,
    /// Error message if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Skip reason or staleness note, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Whether this execution was a half-open circuit probe.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub probe: bool,
}

impl JobResult {
    /// Creates a job result from a stage outcome.
    #[must_use]
    pub fn from_outcome(
        job_name: impl Into<String>,
        outcome: &StageOutcome,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            status: outcome.status(),
            started_at,
            finished_at: Utc::now(),
            attempts,
            items_processed: outcome.items_processed(),
            error: outcome.error_message().map(String::from),
            note: outcome.note().map(String::from),
            probe: false,
        }
    }

    /// Creates a skipped job result for a stage that was not executed.
    #[must_use]
    pub fn skipped(job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_name: job_name.into(),
            status: JobStatus::Skipped,
            started_at: now,
            finished_at: now,
            attempts: 0,
            items_processed: 0,
            error: None,
            note: Some(reason.into()),
            probe: false,
        }
    }

    /// Marks this result as a half-open probe execution.
    #[must_use]
    pub fn as_probe(mut self) -> Self {
        self.probe = true;
        self
    }

    /// Returns the execution duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Returns the execution duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration().num_milliseconds() as f64
    }

    /// Returns true if the stage failed this cycle.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

/// The recorded outcome of one full orchestrator pass.
///
/// Created at cycle start, appended to during the run, finalized and handed
/// to the observability sink at cycle end. Never mutated after finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    /// Unique id for this run (time-ordered).
    pub cycle_id: Uuid,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished; `None` while the cycle is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// One result per top-level stage, in execution order.
    ///
    /// The truth sub-pipeline appears as a single composite entry here;
    /// its four child results are surfaced in [`truth_jobs`](Self::truth_jobs).
    pub jobs: Vec<JobResult>,
    /// Per-stage results of the truth sub-pipeline, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truth_jobs: Vec<JobResult>,
    /// True if any stage ran against stale or absent upstream data,
    /// was skipped by an open circuit, or failed.
    pub degraded: bool,
}

impl CycleResult {
    /// Begins a new cycle record with a fresh time-ordered id.
    #[must_use]
    pub fn begin() -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
            truth_jobs: Vec::new(),
            degraded: false,
        }
    }

    /// Appends a top-level job result.
    pub fn push_job(&mut self, job: JobResult) {
        self.jobs.push(job);
    }

    /// Finalizes the record, stamping `finished_at`.
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Returns true once the record has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// The cycle healthiness predicate.
    ///
    /// True iff no top-level stage failed. Skipped stages (open circuit,
    /// maintenance out of window) do not by themselves make a cycle
    /// unhealthy.
    #[must_use]
    pub fn healthy(&self) -> bool {
        !self.jobs.iter().any(JobResult::is_failure)
    }

    /// Returns the total cycle duration, if finalized.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Looks up a top-level job result by stage name.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job_name == name)
    }

    /// Looks up a truth sub-stage result by name.
    #[must_use]
    pub fn truth_job(&self, name: &str) -> Option<&JobResult> {
        self.truth_jobs.iter().find(|j| j.job_name == name)
    }
}
