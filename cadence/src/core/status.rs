//! Job status and upstream freshness enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The final status of one stage execution within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The stage ran and produced all expected output.
    Success,
    /// The stage ran and produced some but not all expected output,
    /// or ran against stale upstream data.
    Partial,
    /// The stage failed after exhausting its retry.
    Failed,
    /// The stage was intentionally not run this cycle.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl JobStatus {
    /// Returns true if the stage produced output this cycle.
    #[must_use]
    pub fn produced_output(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    /// Returns true if the status counts as a failure.
    ///
    /// Skips are intentional non-executions, not failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Freshness of one upstream dependency, as seen by a downstream stage.
///
/// The pipeline computes one tag per declared dependency and passes the map
/// to the stage; the stage is required to behave accordingly (fall back to
/// persisted output on `Stale`, report skipped or partial on `Absent`,
/// never fabricate data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    /// The dependency succeeded this cycle.
    Fresh,
    /// The dependency failed, was skipped, or ran degraded this cycle;
    /// its last durably-persisted output exists and must be used instead.
    Stale,
    /// No prior successful output of the dependency exists at all.
    Absent,
}

impl fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Stale => write!(f, "stale"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

impl UpstreamState {
    /// Returns true if the dependency's output from this cycle is usable as-is.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Returns true if some output exists, fresh or stale.
    #[must_use]
    pub fn has_output(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}
