//! # Cadence
//!
//! An orchestrator for unattended, recurring multi-stage pipelines.
//!
//! Cadence runs a dependency-ordered pipeline of stages once per "cycle",
//! for days at a time, with no operator watching it. Its job is not any
//! stage's business logic but the machinery around it:
//!
//! - **Job isolation**: every stage runs inside one audited failure
//!   boundary; a failing, panicking, or hanging stage never aborts the cycle
//! - **Retry and circuit breaking**: one bounded retry per cycle, and a
//!   per-stage circuit breaker that stops invoking persistently failing
//!   stages until they probe healthy again
//! - **Graceful degradation**: downstream stages receive an explicit
//!   freshness tag for each dependency and fall back to last-known-good
//!   output instead of failing outright
//! - **Auditable health**: every cycle produces one structured
//!   [`CycleResult`](cycle::CycleResult), and per-stage failure counters
//!   survive across cycles in a persisted [`HealthState`](health::HealthState)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadence::prelude::*;
//!
//! let orchestrator = CycleOrchestrator::builder()
//!     .collect(my_collector)
//!     .truth_stages(time, commitment, capacity, client_health)
//!     .snapshot(snapshot)
//!     .notify(notify)
//!     .maintenance(maintenance, Arc::new(DailyAfterHour::new(2)))
//!     .health_store(Arc::new(JsonHealthStore::new("health.json")))
//!     .build()
//!     .await?;
//!
//! orchestrator.run_until_shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod config;
pub mod core;
pub mod cycle;
pub mod errors;
pub mod health;
pub mod observe;
pub mod pipeline;
pub mod runner;
pub mod sched;
pub mod shutdown;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, Circuit, CircuitBreaker, CircuitState};
    pub use crate::config::OrchestratorConfig;
    pub use crate::core::{
        CycleResult, JobResult, JobStatus, StageOutcome, UpstreamState,
    };
    pub use crate::cycle::{CycleOrchestrator, OrchestratorPhase, TruthCycle};
    pub use crate::errors::{
        BookkeepingError, OrchestratorError, PipelineValidationError,
    };
    pub use crate::health::{
        HealthMonitor, HealthState, HealthStore, JsonHealthStore,
        MemoryHealthStore,
    };
    pub use crate::observe::{
        CollectingCycleSink, CycleSink, LoggingCycleSink, NoOpCycleSink,
    };
    pub use crate::pipeline::{DegradePolicy, StagePipeline, StageSpec};
    pub use crate::runner::{JobRunner, RetryDecision, RetryPolicy};
    pub use crate::sched::{
        CycleSchedule, DailyAfterHour, EveryCycle, IntervalSchedule,
        MaintenanceWindow, ManualSchedule,
    };
    pub use crate::shutdown::ShutdownToken;
    pub use crate::stages::{FnStage, Stage, StageContext, StaticStage};
}
