//! In-memory fakes for driving the pipeline without external services.
//!
//! Shared by this crate's tests and, behind the `testing` feature, by
//! downstream crates that exercise the driver or the API facade.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediabot_downloads::{
    DownloadClient, DownloadResult, TransferContext, TransferState, TransferStatus,
};
use mediabot_exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, ExecResult};
use mediabot_link::ClassifiedLink;
use mediabot_model::{
    AuditEntry, Download, Job, JobStore, MediaAsset, ProcessingStep, StateTransition, StoreResult,
    SyncDecision, UploadManifest,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Fully in-memory `JobStore` used to test the driver and the facade.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<String, Job>,
    history: HashMap<String, Vec<StateTransition>>,
    downloads: HashMap<String, Vec<Download>>,
    assets: HashMap<String, MediaAsset>,
    steps: HashMap<String, Vec<ProcessingStep>>,
    decisions: HashMap<String, SyncDecision>,
    audit: HashMap<String, Vec<AuditEntry>>,
    manifest_paths: HashMap<String, String>,
    upload_manifests: HashMap<String, UploadManifest>,
}

impl MemoryJobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded manifest path for a job, if any.
    pub async fn manifest_path(&self, job_id: &str) -> Option<String> {
        self.inner.lock().await.manifest_paths.get(job_id).cloned()
    }

    /// The recorded upload manifest for a job, if any.
    pub async fn upload_manifest(&self, job_id: &str) -> Option<UploadManifest> {
        self.inner.lock().await.upload_manifests.get(job_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn fetch_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(job_id).cloned())
    }

    async fn update_job(&self, job: &Job) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_jobs(&self, owner: Option<&str>, limit: i64) -> StoreResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| owner.is_none_or(|owner| job.owner == owner))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(jobs)
    }

    async fn append_transition(
        &self,
        job_id: &str,
        transition: &StateTransition,
    ) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .history
            .entry(job_id.to_string())
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    async fn load_history(&self, job_id: &str) -> StoreResult<Vec<StateTransition>> {
        Ok(self
            .inner
            .lock()
            .await
            .history
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_download(&self, download: &Download) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .downloads
            .entry(download.job_id.clone())
            .or_default()
            .push(download.clone());
        Ok(())
    }

    async fn update_download(&self, download: &Download) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(rows) = inner.downloads.get_mut(&download.job_id) {
            if let Some(row) = rows.iter_mut().find(|row| row.id == download.id) {
                *row = download.clone();
            }
        }
        Ok(())
    }

    async fn fetch_downloads(&self, job_id: &str) -> StoreResult<Vec<Download>> {
        Ok(self
            .inner
            .lock()
            .await
            .downloads
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_media_asset(&self, asset: &MediaAsset) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .assets
            .insert(asset.job_id.clone(), asset.clone());
        Ok(())
    }

    async fn fetch_media_asset(&self, job_id: &str) -> StoreResult<Option<MediaAsset>> {
        Ok(self.inner.lock().await.assets.get(job_id).cloned())
    }

    async fn insert_step(&self, step: &ProcessingStep) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .steps
            .entry(step.job_id.clone())
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &ProcessingStep) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(rows) = inner.steps.get_mut(&step.job_id) {
            if let Some(row) = rows.iter_mut().find(|row| row.id == step.id) {
                *row = step.clone();
            }
        }
        Ok(())
    }

    async fn fetch_steps(&self, job_id: &str) -> StoreResult<Vec<ProcessingStep>> {
        let mut steps = self
            .inner
            .lock()
            .await
            .steps
            .get(job_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|step| step.ordinal);
        Ok(steps)
    }

    async fn upsert_sync_decision(&self, decision: &SyncDecision) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .decisions
            .insert(decision.job_id.clone(), decision.clone());
        Ok(())
    }

    async fn fetch_sync_decision(&self, job_id: &str) -> StoreResult<Option<SyncDecision>> {
        Ok(self.inner.lock().await.decisions.get(job_id).cloned())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .audit
            .entry(entry.job_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn fetch_audit(
        &self,
        job_id: &str,
        after: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        let mut entries = self
            .inner
            .lock()
            .await
            .audit
            .get(job_id)
            .cloned()
            .unwrap_or_default();
        if let Some(after) = after {
            entries.retain(|entry| entry.at > after);
        }
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn set_manifest_path(&self, job_id: &str, manifest_path: &str) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .manifest_paths
            .insert(job_id.to_string(), manifest_path.to_string());
        Ok(())
    }

    async fn set_upload_manifest(
        &self,
        job_id: &str,
        manifest: &UploadManifest,
    ) -> StoreResult<()> {
        self.inner
            .lock()
            .await
            .upload_manifests
            .insert(job_id.to_string(), manifest.clone());
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

type RunnerHandler = dyn Fn(&CommandSpec) -> ExecResult<CommandOutput> + Send + Sync;

/// Command runner whose behaviour is supplied by the test.
pub struct FakeRunner {
    handler: Box<RunnerHandler>,
    invocations: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    /// Runner delegating every invocation to the handler.
    #[must_use]
    pub fn new(
        handler: impl Fn(&CommandSpec) -> ExecResult<CommandOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: &str) -> ExecResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 3,
        })
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: &str) -> ExecResult<CommandOutput> {
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            duration_ms: 3,
        })
    }

    /// Every spec this runner has executed, in order.
    pub async fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecResult<CommandOutput> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        self.invocations.lock().await.push(spec.clone());
        (self.handler)(spec)
    }
}

/// Download client that "produces" the given files instantly.
///
/// On `start` it writes each file (with placeholder bytes) under the
/// transfer's output directory, and the first poll reports completion.
pub struct InstantClient {
    name: &'static str,
    filenames: Vec<String>,
    total_bytes: u64,
}

impl InstantClient {
    /// Client producing the given filenames in the output directory.
    #[must_use]
    pub fn new(name: &'static str, filenames: Vec<String>, total_bytes: u64) -> Self {
        Self {
            name,
            filenames,
            total_bytes,
        }
    }
}

#[async_trait]
impl DownloadClient for InstantClient {
    fn name(&self) -> &'static str {
        self.name
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }

    async fn start(
        &self,
        _link: &ClassifiedLink,
        context: &TransferContext,
        _cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        std::fs::create_dir_all(&context.output_dir)
            .map_err(|err| mediabot_downloads::DownloadError::client(self.name, err.to_string()))?;
        for filename in &self.filenames {
            std::fs::write(context.output_dir.join(filename), b"payload-bytes").map_err(
                |err| mediabot_downloads::DownloadError::client(self.name, err.to_string()),
            )?;
        }
        Ok(format!("handle-{}", context.job_id))
    }

    async fn poll(
        &self,
        _handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        Ok(TransferStatus::completed(self.total_bytes))
    }

    async fn cancel(&self, _handle: &str) -> DownloadResult<()> {
        Ok(())
    }

    async fn files(
        &self,
        _handle: &str,
        context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        Ok(self
            .filenames
            .iter()
            .map(|filename| context.output_dir.join(filename))
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Client that never starts; fills router slots a test does not exercise.
pub struct UnusedClient(pub &'static str);

#[async_trait]
impl DownloadClient for UnusedClient {
    fn name(&self) -> &'static str {
        self.0
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(1)
    }

    async fn start(
        &self,
        _link: &ClassifiedLink,
        _context: &TransferContext,
        _cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        Err(mediabot_downloads::DownloadError::client(
            self.0,
            "client not under test",
        ))
    }

    async fn poll(
        &self,
        _handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        Ok(TransferStatus {
            state: TransferState::Queued,
            progress: 0.0,
            speed_bps: 0,
            eta_seconds: None,
            total_bytes: 0,
        })
    }

    async fn cancel(&self, _handle: &str) -> DownloadResult<()> {
        Ok(())
    }

    async fn files(
        &self,
        _handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Reference a store as the trait object the driver expects.
#[must_use]
pub fn as_store(store: Arc<MemoryJobStore>) -> Arc<dyn JobStore> {
    store
}
