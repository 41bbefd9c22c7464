//! The cycle layer: truth sub-pipeline wiring, the orchestrator, and its
//! unattended run loop.

mod orchestrator;
mod truth;

#[cfg(test)]
mod integration_tests;

pub use orchestrator::{CycleOrchestrator, CycleOrchestratorBuilder, OrchestratorPhase};
pub use truth::TruthCycle;

pub use crate::core::CycleResult;

/// Canonical stage names used by the orchestrator's pipelines.
pub mod names {
    /// Data collection stage.
    pub const COLLECT: &str = "collect";
    /// Composite truth sub-pipeline stage.
    pub const TRUTH: &str = "truth";
    /// Snapshot assembly stage.
    pub const SNAPSHOT: &str = "snapshot";
    /// Notification stage.
    pub const NOTIFY: &str = "notify";
    /// Daily maintenance stage.
    pub const MAINTENANCE: &str = "maintenance";

    /// Time truth sub-stage.
    pub const TIME: &str = "time";
    /// Commitment truth sub-stage.
    pub const COMMITMENT: &str = "commitment";
    /// Capacity truth sub-stage.
    pub const CAPACITY: &str = "capacity";
    /// Client-health truth sub-stage.
    pub const CLIENT_HEALTH: &str = "client-health";
}
