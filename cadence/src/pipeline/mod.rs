//! Dependency-ordered stage pipeline with graceful degradation.
//!
//! A pipeline is an ordered list of stage specs executed one after another
//! through the job runner. It does **not** abort on a non-success result;
//! instead each downstream stage receives an explicit freshness tag for
//! every declared dependency and degrades accordingly.

mod executor;
mod spec;

pub use executor::{PipelineRun, StagePipeline};
pub use spec::{DegradePolicy, StageSpec};
