//! Stage trait and adapters.
//!
//! Stages are the black-box units of work the orchestrator sequences:
//! collectors, truth modules, snapshot assembly, notification, maintenance.
//! The orchestrator never sees their business data, only the
//! [`StageOutcome`] they report.

use crate::core::{StageOutcome, UpstreamState};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Execution context handed to a stage for one invocation.
///
/// Carries the freshness tag of every declared dependency; the stage is
/// required to honor the degradation contract (fall back to persisted
/// output on stale dependencies, report skip or partial on absent ones).
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The id of the cycle this invocation belongs to.
    pub cycle_id: Uuid,
    /// Freshness of each declared dependency, keyed by stage name.
    pub upstream: BTreeMap<String, UpstreamState>,
    /// Whether this execution is a half-open circuit probe.
    pub probe: bool,
    /// The attempt number within this cycle (1-indexed).
    pub attempt: u32,
}

impl StageContext {
    /// Creates a context for the given cycle with the given upstream map.
    #[must_use]
    pub fn new(cycle_id: Uuid, upstream: BTreeMap<String, UpstreamState>) -> Self {
        Self {
            cycle_id,
            upstream,
            probe: false,
            attempt: 1,
        }
    }

    /// Returns the freshness of one dependency.
    ///
    /// Asking about an undeclared dependency yields `Absent`: a stage has
    /// no claim on data it never declared.
    #[must_use]
    pub fn upstream_state(&self, dependency: &str) -> UpstreamState {
        self.upstream
            .get(dependency)
            .copied()
            .unwrap_or(UpstreamState::Absent)
    }

    /// Returns true if every declared dependency is fresh this cycle.
    #[must_use]
    pub fn all_fresh(&self) -> bool {
        self.upstream.values().all(UpstreamState::is_fresh)
    }

    /// Returns the names of dependencies that are not fresh this cycle.
    #[must_use]
    pub fn degraded_dependencies(&self) -> Vec<&str> {
        self.upstream
            .iter()
            .filter(|(_, state)| !state.is_fresh())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Trait for orchestrated stages.
///
/// A stage must translate every internal error into
/// [`StageOutcome::Error`] before returning; nothing it does may propagate
/// past the runner's failure boundary. Side effects (writes to durable
/// storage, external calls) belong to the stage itself — the orchestrator
/// adds none beyond timing, logging, and state-machine bookkeeping.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage once.
    async fn run(&self, ctx: &StageContext) -> StageOutcome;
}

type StageFn = dyn Fn(StageContext) -> BoxFuture<'static, StageOutcome> + Send + Sync;

/// An async closure adapted into a [`Stage`].
pub struct FnStage {
    name: String,
    func: Arc<StageFn>,
}

impl FnStage {
    /// Creates a stage from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = StageOutcome> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx| -> BoxFuture<'static, StageOutcome> {
                Box::pin(func(ctx))
            }),
        }
    }
}

impl Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        (self.func)(ctx.clone()).await
    }
}

/// A stage that always reports the same outcome.
#[derive(Debug, Clone)]
pub struct StaticStage {
    name: String,
    outcome: StageOutcome,
}

impl StaticStage {
    /// Creates a stage with a fixed outcome.
    #[must_use]
    pub fn new(name: impl Into<String>, outcome: StageOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }

    /// Creates a stage that always succeeds with zero items.
    #[must_use]
    pub fn ok(name: impl Into<String>) -> Self {
        Self::new(name, StageOutcome::success(0))
    }
}

#[async_trait]
impl Stage for StaticStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &StageContext) -> StageOutcome {
        self.outcome.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;

    fn ctx_with(dep: &str, state: UpstreamState) -> StageContext {
        let mut upstream = BTreeMap::new();
        upstream.insert(dep.to_string(), state);
        StageContext::new(Uuid::now_v7(), upstream)
    }

    #[test]
    fn test_upstream_state_lookup() {
        let ctx = ctx_with("collect", UpstreamState::Stale);

        assert_eq!(ctx.upstream_state("collect"), UpstreamState::Stale);
        assert_eq!(ctx.upstream_state("undeclared"), UpstreamState::Absent);
        assert!(!ctx.all_fresh());
        assert_eq!(ctx.degraded_dependencies(), vec!["collect"]);
    }

    #[test]
    fn test_all_fresh() {
        let ctx = ctx_with("collect", UpstreamState::Fresh);
        assert!(ctx.all_fresh());
        assert!(ctx.degraded_dependencies().is_empty());
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("echo", |ctx: StageContext| async move {
            if ctx.all_fresh() {
                StageOutcome::success(1)
            } else {
                StageOutcome::partial(1, "degraded input")
            }
        });

        assert_eq!(stage.name(), "echo");

        let fresh = ctx_with("dep", UpstreamState::Fresh);
        assert_eq!(stage.run(&fresh).await.status(), JobStatus::Success);

        let stale = ctx_with("dep", UpstreamState::Stale);
        assert_eq!(stage.run(&stale).await.status(), JobStatus::Partial);
    }

    #[tokio::test]
    async fn test_static_stage() {
        let stage = StaticStage::new("fixed", StageOutcome::skip("nothing to do"));
        let ctx = StageContext::new(Uuid::now_v7(), BTreeMap::new());

        let outcome = stage.run(&ctx).await;
        assert_eq!(outcome.status(), JobStatus::Skipped);
    }
}
