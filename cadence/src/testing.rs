//! Test support: scripted stages with observable call counts.

use crate::core::StageOutcome;
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// A stage that replays a scripted sequence of outcomes.
///
/// Each invocation consumes the next scripted outcome; once the script is
/// exhausted the default outcome repeats. Call counts are observable, which
/// is what most orchestration tests actually assert on.
#[derive(Debug)]
pub struct ScriptedStage {
    name: String,
    script: Mutex<VecDeque<StageOutcome>>,
    default: StageOutcome,
    calls: AtomicU32,
}

impl ScriptedStage {
    /// Creates a stage whose default outcome is success with zero items.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default: StageOutcome::success(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Appends one outcome to the script.
    #[must_use]
    pub fn then(self, outcome: StageOutcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Sets the outcome repeated after the script is exhausted.
    #[must_use]
    pub fn otherwise(mut self, outcome: StageOutcome) -> Self {
        self.default = outcome;
        self
    }

    /// Returns how many times the stage has been invoked.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &StageContext) -> StageOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn ctx() -> StageContext {
        StageContext::new(Uuid::now_v7(), BTreeMap::new())
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let stage = ScriptedStage::new("collect")
            .then(StageOutcome::error("first fails"))
            .otherwise(StageOutcome::success(5));

        assert_eq!(stage.run(&ctx()).await.status(), JobStatus::Failed);
        assert_eq!(stage.run(&ctx()).await.status(), JobStatus::Success);
        assert_eq!(stage.run(&ctx()).await.status(), JobStatus::Success);
        assert_eq!(stage.calls(), 3);
    }
}
