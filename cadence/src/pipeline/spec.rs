//! Stage specifications and degradation policy.

use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// What "running in degraded mode" means for a stage whose upstream data
/// is not fresh this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradePolicy {
    /// Run anyway; the stage falls back to the last durably-persisted
    /// output of each stale dependency and reports `partial`.
    #[default]
    UseLastGood,
    /// Skip without executing when any dependency is not fresh, marking
    /// downstream output stale in turn.
    SkipOnStale,
}

/// Static descriptor of a runnable stage: defined once at pipeline
/// construction, immutable afterwards.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages that must have run (successfully or degraded)
    /// before this one starts.
    pub depends_on: HashSet<String>,
    /// Behavior when upstream data is not fresh.
    pub degrade: DegradePolicy,
    /// Per-stage timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl StageSpec {
    /// Creates a new stage specification with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            depends_on: HashSet::new(),
            degrade: DegradePolicy::default(),
            timeout_ms: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_depends_on(
        mut self,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }

    /// Sets the degradation policy.
    #[must_use]
    pub fn with_degrade(mut self, policy: DegradePolicy) -> Self {
        self.degrade = policy;
        self
    }

    /// Overrides the default per-stage timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = Some(timeout);
        self
    }

    /// Returns the effective timeout for this stage.
    #[must_use]
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map_or(default, Duration::from_millis)
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Stage name cannot be empty or whitespace-only",
            ));
        }
        if self.depends_on.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StaticStage;

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new("collect", Arc::new(StaticStage::ok("collect")))
            .with_depends_on(["a", "b"])
            .with_degrade(DegradePolicy::SkipOnStale)
            .with_timeout_ms(5_000);

        assert_eq!(spec.name, "collect");
        assert_eq!(spec.depends_on.len(), 2);
        assert_eq!(spec.degrade, DegradePolicy::SkipOnStale);
        assert_eq!(
            spec.timeout(Duration::from_secs(300)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_default_timeout_applies() {
        let spec = StageSpec::new("collect", Arc::new(StaticStage::ok("collect")));
        assert_eq!(
            spec.timeout(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_self_dependency_rejected() {
        let spec = StageSpec::new("collect", Arc::new(StaticStage::ok("collect")))
            .with_dependency("collect");

        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let spec = StageSpec::new("  ", Arc::new(StaticStage::ok("x")));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_degrade_policy_default() {
        assert_eq!(DegradePolicy::default(), DegradePolicy::UseLastGood);
    }
}
