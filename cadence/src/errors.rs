//! Error types for the cadence orchestrator.
//!
//! Stage-level failures are never surfaced as errors; they become
//! [`JobResult`](crate::core::JobResult) data. The types here cover the two
//! classes that do surface as `Err`: pipeline construction mistakes and the
//! orchestrator's own bookkeeping failures.

use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A pipeline validation error occurred at construction time.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// An orchestrator bookkeeping operation failed.
    ///
    /// This is the single fatal error class: continuing without reliable
    /// health bookkeeping would silently corrupt the failure-isolation
    /// guarantees the orchestrator exists to provide.
    #[error("{0}")]
    Bookkeeping(#[from] BookkeepingError),
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved in the error.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Failure of the orchestrator's own bookkeeping.
///
/// Everything else in the system degrades; these halt the run loop.
#[derive(Debug, Clone, Error)]
pub enum BookkeepingError {
    /// Persisting the health state failed.
    #[error("failed to persist health state: {0}")]
    HealthPersist(String),

    /// Loading the health state at startup failed.
    #[error("failed to load health state: {0}")]
    HealthLoad(String),

    /// Finalizing a cycle record failed.
    #[error("failed to finalize cycle record: {0}")]
    CycleFinalize(String),
}
