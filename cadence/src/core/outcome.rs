//! Stage outcome type with factory methods.

use super::JobStatus;
use serde::{Deserialize, Serialize};

/// The outcome a stage function reports back to the runner.
///
/// This is a tagged variant rather than an untyped map so that downstream
/// consumers get exhaustiveness checking. A stage function must translate
/// every internal error into [`StageOutcome::Error`] before returning; the
/// runner's failure boundary additionally catches panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage ran and produced all expected output.
    Success {
        /// Number of items the stage processed.
        items_processed: u64,
        /// Optional note, e.g. a summary of what was produced.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// The stage ran but produced some but not all expected output,
    /// or ran against stale upstream data.
    Partial {
        /// Number of items the stage processed.
        items_processed: u64,
        /// Explicit staleness or incompleteness note.
        note: String,
    },
    /// The stage failed.
    Error {
        /// Description of the failure.
        message: String,
    },
    /// The stage decided not to run (e.g. no input data exists yet).
    Skip {
        /// The reason for skipping.
        reason: String,
    },
}

impl StageOutcome {
    /// Creates a success outcome.
    #[must_use]
    pub fn success(items_processed: u64) -> Self {
        Self::Success {
            items_processed,
            note: None,
        }
    }

    /// Creates a success outcome with a note.
    #[must_use]
    pub fn success_with_note(items_processed: u64, note: impl Into<String>) -> Self {
        Self::Success {
            items_processed,
            note: Some(note.into()),
        }
    }

    /// Creates a partial outcome with an explicit staleness note.
    #[must_use]
    pub fn partial(items_processed: u64, note: impl Into<String>) -> Self {
        Self::Partial {
            items_processed,
            note: note.into(),
        }
    }

    /// Creates an error outcome.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Creates a skip outcome with a reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }

    /// Returns the job status this outcome maps to.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Success { .. } => JobStatus::Success,
            Self::Partial { .. } => JobStatus::Partial,
            Self::Error { .. } => JobStatus::Failed,
            Self::Skip { .. } => JobStatus::Skipped,
        }
    }

    /// Returns the number of items processed, zero for errors and skips.
    #[must_use]
    pub fn items_processed(&self) -> u64 {
        match self {
            Self::Success {
                items_processed, ..
            }
            | Self::Partial {
                items_processed, ..
            } => *items_processed,
            Self::Error { .. } | Self::Skip { .. } => 0,
        }
    }

    /// Returns the error message, if this is an error outcome.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Returns the note or skip reason, if any.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Success { note, .. } => note.as_deref(),
            Self::Partial { note, .. } => Some(note),
            Self::Skip { reason } => Some(reason),
            Self::Error { .. } => None,
        }
    }

    /// Returns true if the outcome counts as a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns true if the stage produced output this cycle.
    #[must_use]
    pub fn produced_output(&self) -> bool {
        self.status().produced_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_outcome() {
        let outcome = StageOutcome::success(42);
        assert_eq!(outcome.status(), JobStatus::Success);
        assert_eq!(outcome.items_processed(), 42);
        assert!(outcome.note().is_none());
        assert!(!outcome.is_failure());
    }

    #[test]
    fn test_partial_outcome() {
        let outcome = StageOutcome::partial(7, "used stale time-truth output");
        assert_eq!(outcome.status(), JobStatus::Partial);
        assert_eq!(outcome.items_processed(), 7);
        assert_eq!(outcome.note(), Some("used stale time-truth output"));
        assert!(outcome.produced_output());
    }

    #[test]
    fn test_error_outcome() {
        let outcome = StageOutcome::error("upstream API returned 503");
        assert_eq!(outcome.status(), JobStatus::Failed);
        assert_eq!(outcome.items_processed(), 0);
        assert_eq!(outcome.error_message(), Some("upstream API returned 503"));
        assert!(outcome.is_failure());
    }

    #[test]
    fn test_skip_outcome() {
        let outcome = StageOutcome::skip("no data collected yet");
        assert_eq!(outcome.status(), JobStatus::Skipped);
        assert_eq!(outcome.note(), Some("no data collected yet"));
        assert!(!outcome.is_failure());
        assert!(!outcome.produced_output());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = StageOutcome::success_with_note(3, "3 snapshots written");
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains(r#""status":"success""#));

        let back: StageOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
    }
}
