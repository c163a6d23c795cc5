#![forbid(unsafe_code)]

//! Engine-agnostic domain types shared across the mediabot workspace.
//!
//! Everything a pipeline stage produces or consumes lives here: jobs and
//! their children (downloads, processing steps, sync decisions), the job
//! state machine, the package/upload manifests, the ephemeral progress
//! record, and the `JobStore` port the driver persists through.

pub mod audit;
pub mod download;
pub mod error;
pub mod job;
pub mod manifest;
pub mod progress;
pub mod state;
pub mod step;
pub mod store;
pub mod sync;

pub use audit::AuditEntry;
pub use download::{Download, DownloadStatus};
pub use error::{PipelineError, PipelineResult};
pub use job::{Job, JobKind, JobPriority, MediaAsset};
pub use manifest::{FileKind, ManifestFile, PackageManifest, UploadManifest, UploadedFile};
pub use progress::ProgressRecord;
pub use state::{JobState, StateMachine, StateTransition};
pub use step::{ProcessingStep, StepStatus, StepType};
pub use store::{JobStore, StoreError, StoreResult};
pub use sync::{
    AnchorPoint, MethodEstimate, OffsetMeasurements, SpanMs, SyncDecision, SyncDecisionKind,
    SyncMeasurements,
};
