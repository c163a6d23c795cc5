#![forbid(unsafe_code)]

//! The job pipeline engine.
//!
//! One long-lived cooperative task per job drives it from PENDING to a
//! terminal state: classify and download, probe, measure and decide a
//! correction, process, validate (with a single permitted re-processing
//! pass), package, upload. Stage concurrency across jobs is bounded by
//! stage-keyed semaphores; cancellation is observed between stages and at
//! every external suspension point.

pub mod driver;
pub mod limits;
pub mod media;
pub mod plan;
pub mod runner;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::{EngineSettings, PipelineDriver};
pub use limits::StageLimits;
pub use runner::JobRunner;
