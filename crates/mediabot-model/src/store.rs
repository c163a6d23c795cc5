//! Durable persistence port for jobs and their children.
//!
//! The driver only ever talks to this trait, so it can run against the
//! PostgreSQL adapter in production and an in-memory fake in tests. The
//! error type stays backend-agnostic; adapters map their own failures into
//! it and keep the diagnostic text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::AuditEntry;
use crate::download::Download;
use crate::job::{Job, MediaAsset};
use crate::manifest::UploadManifest;
use crate::state::StateTransition;
use crate::step::ProcessingStep;
use crate::sync::SyncDecision;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by a `JobStore` adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("store backend failure")]
    Backend {
        /// Store operation that failed.
        operation: &'static str,
        /// Backend diagnostic.
        message: String,
    },
    /// A persisted row could not be decoded into its domain type.
    #[error("store decode failure")]
    Decode {
        /// Store operation that failed.
        operation: &'static str,
        /// Decode diagnostic.
        message: String,
    },
}

impl StoreError {
    /// Build a backend failure with the adapter's diagnostic.
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }

    /// Build a decode failure with the adapter's diagnostic.
    pub fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            operation,
            message: message.into(),
        }
    }
}

impl From<StoreError> for crate::error::PipelineError {
    fn from(err: StoreError) -> Self {
        let (operation, message) = match &err {
            StoreError::Backend { operation, message } | StoreError::Decode { operation, message } => {
                (*operation, message.clone())
            }
        };
        Self::Storage { operation, message }
    }
}

/// Durable repository for jobs, downloads, steps, decisions, state history,
/// audit entries, and manifests.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a newly created job.
    async fn create_job(&self, job: &Job) -> StoreResult<()>;
    /// Fetch a job by id.
    async fn fetch_job(&self, job_id: &str) -> StoreResult<Option<Job>>;
    /// Persist the current job row (state, progress, error, timestamps).
    async fn update_job(&self, job: &Job) -> StoreResult<()>;
    /// List jobs for an owner, newest first.
    async fn list_jobs(&self, owner: Option<&str>, limit: i64) -> StoreResult<Vec<Job>>;

    /// Append one state transition to the job's history.
    async fn append_transition(
        &self,
        job_id: &str,
        transition: &StateTransition,
    ) -> StoreResult<()>;
    /// Load the job's transition history, oldest first.
    async fn load_history(&self, job_id: &str) -> StoreResult<Vec<StateTransition>>;

    /// Insert a download row.
    async fn insert_download(&self, download: &Download) -> StoreResult<()>;
    /// Update a download row by id.
    async fn update_download(&self, download: &Download) -> StoreResult<()>;
    /// Fetch the job's download rows, oldest first.
    async fn fetch_downloads(&self, job_id: &str) -> StoreResult<Vec<Download>>;

    /// Insert or replace the job's media asset.
    async fn upsert_media_asset(&self, asset: &MediaAsset) -> StoreResult<()>;
    /// Fetch the job's media asset.
    async fn fetch_media_asset(&self, job_id: &str) -> StoreResult<Option<MediaAsset>>;

    /// Insert a processing step row.
    async fn insert_step(&self, step: &ProcessingStep) -> StoreResult<()>;
    /// Update a processing step row by id.
    async fn update_step(&self, step: &ProcessingStep) -> StoreResult<()>;
    /// Fetch the job's steps ordered by ordinal.
    async fn fetch_steps(&self, job_id: &str) -> StoreResult<Vec<ProcessingStep>>;

    /// Insert or replace the job's sync decision.
    async fn upsert_sync_decision(&self, decision: &SyncDecision) -> StoreResult<()>;
    /// Fetch the job's sync decision.
    async fn fetch_sync_decision(&self, job_id: &str) -> StoreResult<Option<SyncDecision>>;

    /// Append an audit entry to the job's stream.
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;
    /// Fetch audit entries after a timestamp cursor, oldest first.
    async fn fetch_audit(
        &self,
        job_id: &str,
        after: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>>;

    /// Record the path of the produced package manifest.
    async fn set_manifest_path(&self, job_id: &str, manifest_path: &str) -> StoreResult<()>;
    /// Record the upload manifest produced by the upload router.
    async fn set_upload_manifest(
        &self,
        job_id: &str,
        manifest: &UploadManifest,
    ) -> StoreResult<()>;

    /// Whether the backend is reachable.
    async fn ping(&self) -> bool;
}
