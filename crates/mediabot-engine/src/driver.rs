//! The per-job pipeline driver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mediabot_downloads::{
    DownloadError, DownloadRouter, ProgressObserver, TransferContext, TransferStatus,
};
use mediabot_exec::{CommandOutput, CommandRunner, CommandSpec, ExecError, truncate_stderr};
use mediabot_link::classify;
use mediabot_model::{
    AuditEntry, Download, DownloadStatus, FileKind, Job, JobKind, JobState, JobStore, MediaAsset,
    PackageManifest, PipelineError, PipelineResult, ProcessingStep, ProgressRecord, StateMachine,
    StepStatus, StepType, SyncDecisionKind,
};
use mediabot_package::{PackageSet, package};
use mediabot_progress::ProgressStore;
use mediabot_sync::DecisionEngine;
use mediabot_upload::{UploadError, UploadRouter};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::limits::StageLimits;
use crate::media::{self, MediaProbe};
use crate::plan;

/// Reason recorded on the one-shot VALIDATING -> PROCESSING arc.
const REVALIDATE_REASON: &str = "revalidate";
/// Reason recorded when a retry re-enters PENDING.
const RETRY_REASON: &str = "retry";
/// Error string for a permanently failed retry budget.
const RETRY_EXHAUSTED: &str = "retry-exhausted";

/// Driver tunables and tool locations.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Scratch root downloads land in (one subdirectory per job).
    pub working_root: PathBuf,
    /// Root packages are assembled under.
    pub processed_root: PathBuf,
    /// Re-entry cap after FAILED/CANCELLED.
    pub retry_cap: u32,
    /// Per-step command timeout.
    pub step_timeout: Duration,
    /// ffprobe binary.
    pub ffprobe_bin: PathBuf,
    /// ffmpeg binary.
    pub ffmpeg_bin: PathBuf,
    /// Sync measurement analyzer binary.
    pub analyzer_bin: PathBuf,
}

/// Drives single jobs from PENDING to a terminal state.
pub struct PipelineDriver {
    store: Arc<dyn JobStore>,
    progress: Arc<dyn ProgressStore>,
    router: Arc<DownloadRouter>,
    runner: Arc<dyn CommandRunner>,
    engine: DecisionEngine,
    uploads: UploadRouter,
    limits: Arc<StageLimits>,
    settings: EngineSettings,
}

impl PipelineDriver {
    /// Driver over injected collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        progress: Arc<dyn ProgressStore>,
        router: Arc<DownloadRouter>,
        runner: Arc<dyn CommandRunner>,
        engine: DecisionEngine,
        uploads: UploadRouter,
        limits: Arc<StageLimits>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            progress,
            router,
            runner,
            engine,
            uploads,
            limits,
            settings,
        }
    }

    /// The job store this driver persists through.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// The progress store this driver reports through.
    #[must_use]
    pub fn progress_store(&self) -> Arc<dyn ProgressStore> {
        Arc::clone(&self.progress)
    }

    /// The download router health surface.
    #[must_use]
    pub fn download_router(&self) -> Arc<DownloadRouter> {
        Arc::clone(&self.router)
    }

    /// Drive a job until it reaches DONE, FAILED, or CANCELLED.
    ///
    /// Re-entering a FAILED or CANCELLED job counts as a retry: the job
    /// transitions back to PENDING, the retry counter increments, and
    /// steps completed on earlier attempts are not re-run.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown jobs, `RetryExhausted` when the
    /// retry cap is already spent, and storage errors raised while
    /// persisting the pipeline's own bookkeeping.
    pub async fn run(&self, job_id: &str, cancel: CancellationToken) -> PipelineResult<JobState> {
        let mut job = self
            .store
            .fetch_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            })?;
        let history = self.store.load_history(job_id).await?;
        let mut machine = StateMachine::from_parts(job.id.clone(), job.state, history)?;

        if machine.current() == JobState::Done {
            return Ok(JobState::Done);
        }
        if matches!(machine.current(), JobState::Failed | JobState::Cancelled) {
            self.reenter(&mut job, &mut machine).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return self.cancel_job(&mut job, &mut machine).await;
            }

            let stage_result = match machine.current() {
                JobState::Pending => {
                    self.advance(&mut job, &mut machine, JobState::Downloading, Some("start"), None)
                        .await
                }
                JobState::Downloading => {
                    self.stage_download(&mut job, &mut machine, &cancel).await
                }
                JobState::Analyzing => self.stage_analyze(&mut job, &mut machine, &cancel).await,
                JobState::Syncing => self.stage_sync(&mut job, &mut machine, &cancel).await,
                JobState::Processing => {
                    self.stage_process(&mut job, &mut machine, &cancel).await
                }
                JobState::Validating => {
                    self.stage_validate(&mut job, &mut machine, &cancel).await
                }
                JobState::Packaged => self.stage_package(&mut job, &mut machine).await,
                JobState::Uploaded => self.stage_upload(&mut job, &mut machine, &cancel).await,
                JobState::Done => {
                    self.finish(&job).await;
                    return Ok(JobState::Done);
                }
                state @ (JobState::Failed | JobState::Cancelled) => return Ok(state),
            };

            if let Err(err) = stage_result {
                if err.is_cancelled() {
                    return self.cancel_job(&mut job, &mut machine).await;
                }
                if matches!(err, PipelineError::Storage { .. }) {
                    return Err(err);
                }
                return self.fail_job(&mut job, &mut machine, &err).await;
            }
        }
    }

    async fn reenter(&self, job: &mut Job, machine: &mut StateMachine) -> PipelineResult<()> {
        if job.retry_count >= self.settings.retry_cap {
            job.error = Some(RETRY_EXHAUSTED.to_string());
            job.updated_at = Utc::now();
            self.store.update_job(job).await?;
            self.audit(job, "retry", RETRY_EXHAUSTED).await;
            return Err(PipelineError::RetryExhausted {
                attempts: job.retry_count,
            });
        }
        job.retry_count += 1;
        job.error = None;
        job.progress = 0;
        self.advance(
            job,
            machine,
            JobState::Pending,
            Some(RETRY_REASON),
            Some(json!({ "attempt": job.retry_count })),
        )
        .await
    }

    async fn stage_download(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .download
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let link = classify(&job.link).ok_or_else(|| PipelineError::UnsupportedLink {
            link: job.link.clone(),
        })?;
        let client_name = self
            .router
            .client_name(link.kind)
            .map_err(|_| PipelineError::UnsupportedLink {
                link: job.link.clone(),
            })?;

        let mut download = Download::pending(&job.id, &link.original, link.kind.as_str());
        download.client = Some(client_name.to_string());
        self.store.insert_download(&download).await?;

        download.status = DownloadStatus::Downloading;
        download.started_at = Some(Utc::now());
        self.store.update_download(&download).await?;
        self.write_progress(&job.id, client_name, "downloading", 0, None, None)
            .await;

        let context = TransferContext {
            job_id: job.id.clone(),
            output_dir: self.settings.working_root.join(&job.id),
            priority: job.priority,
        };
        let observer = StoreObserver {
            progress: Arc::clone(&self.progress),
        };

        match self.router.download(&link, &context, cancel, &observer).await {
            Ok(outcome) => {
                download.handle = Some(outcome.handle.clone());
                download.complete(
                    &context.output_dir.to_string_lossy(),
                    outcome.total_bytes,
                );
                self.store.update_download(&download).await?;
                self.audit(
                    job,
                    "download",
                    format!(
                        "transfer completed via {} in {} ms",
                        outcome.client, outcome.duration_ms
                    ),
                )
                .await;

                let asset = categorize_files(&job.id, &outcome.files);
                self.store.upsert_media_asset(&asset).await?;

                job.progress = 40;
                self.advance(job, machine, JobState::Analyzing, None, None).await
            }
            Err(err) => {
                let (status, message) = match &err {
                    DownloadError::Cancelled => {
                        (DownloadStatus::Cancelled, "cancelled".to_string())
                    }
                    other => (DownloadStatus::Failed, other.to_string()),
                };
                download.status = status;
                download.error = Some(message);
                self.store.update_download(&download).await?;
                Err(map_download_error(err, &job.link))
            }
        }
    }

    async fn stage_analyze(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .process
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.write_progress(&job.id, "probe", "analyzing", 45, None, None)
            .await;

        let mut asset = self.require_asset(&job.id).await?;
        let input = primary_input(&asset)?;
        let spec = plan::probe_spec(&self.settings.ffprobe_bin, &input);

        let probe = match self
            .run_planned_step(job, StepType::Probe, &spec, true, cancel)
            .await?
        {
            StepRun::Executed(_, output) => media::parse_probe(&output.stdout)?,
            StepRun::AlreadyCompleted(step) => {
                media::parse_probe(step.stdout.as_deref().unwrap_or_default())?
            }
        };

        asset.has_video = probe.has_video;
        asset.has_audio = probe.has_audio;
        asset.duration_seconds = probe.duration_seconds.or(asset.duration_seconds);
        self.store.upsert_media_asset(&asset).await?;

        job.progress = 50;
        if probe.has_video && probe.has_audio {
            self.advance(job, machine, JobState::Syncing, None, None).await
        } else {
            // Single-stream payloads have nothing to synchronise.
            self.advance(
                job,
                machine,
                JobState::Processing,
                Some("single-stream"),
                None,
            )
            .await
        }
    }

    async fn stage_sync(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .process
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.write_progress(&job.id, "sync", "syncing", 55, None, None)
            .await;

        let asset = self.require_asset(&job.id).await?;
        let video = primary_input(&asset)?;
        let audio = asset
            .audio_paths
            .first()
            .map_or_else(|| video.clone(), PathBuf::from);
        let spec = plan::analyze_spec(&self.settings.analyzer_bin, &video, &audio);

        let measurements = match self
            .run_planned_step(job, StepType::SyncAnalyze, &spec, true, cancel)
            .await?
        {
            StepRun::Executed(_, output) => media::parse_measurements(&output.stdout)?,
            StepRun::AlreadyCompleted(step) => {
                media::parse_measurements(step.stdout.as_deref().unwrap_or_default())?
            }
        };

        let decision = self.engine.decide(&job.id, &measurements);
        self.store.upsert_sync_decision(&decision).await?;
        self.audit(
            job,
            "sync",
            format!(
                "decision {} ({})",
                decision.decision.as_str(),
                decision.rationale
            ),
        )
        .await;

        if decision.decision == SyncDecisionKind::Reject {
            return Err(PipelineError::SyncRejected {
                reason: decision
                    .reject_reason
                    .unwrap_or_else(|| "rejected".to_string()),
            });
        }

        job.progress = 60;
        self.advance(job, machine, JobState::Processing, None, None).await
    }

    async fn stage_process(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .process
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.write_progress(&job.id, "process", "processing", 65, None, None)
            .await;

        // Arriving through the one-shot revalidation arc forces fresh
        // mux/sample rows instead of reusing the completed ones.
        let revalidate = machine
            .history()
            .last()
            .is_some_and(|transition| transition.reason.as_deref() == Some(REVALIDATE_REASON));

        let mut asset = self.require_asset(&job.id).await?;
        let decision = self.store.fetch_sync_decision(&job.id).await?;
        // Only full-pipeline jobs apply corrections; download and
        // analyze-only jobs remux untouched.
        let correction = match job.kind {
            JobKind::FullPipeline => decision
                .as_ref()
                .filter(|decision| decision.decision != SyncDecisionKind::None),
            JobKind::Download | JobKind::AnalyzeOnly => None,
        };

        let work_dir = self.settings.working_root.join(&job.id);
        let processed = work_dir.join("processed.mkv");
        let sample = work_dir.join("sample.mkv");
        let video = primary_input(&asset)?;
        let audio = asset.audio_paths.first().map(PathBuf::from);

        let mux = if asset.has_video && asset.has_audio {
            plan::mux_spec(
                &self.settings.ffmpeg_bin,
                correction,
                &video,
                audio.as_deref(),
                &processed,
            )
        } else {
            plan::remux_spec(&self.settings.ffmpeg_bin, &video, &processed)
        };
        self.run_planned_step(job, StepType::Mux, &mux, !revalidate, cancel)
            .await?;

        let sample_cut = plan::sample_spec(
            &self.settings.ffmpeg_bin,
            &processed,
            &sample,
            asset.duration_seconds,
        );
        self.run_planned_step(job, StepType::SampleGen, &sample_cut, !revalidate, cancel)
            .await?;

        asset.video_path = Some(processed.to_string_lossy().into_owned());
        self.store.upsert_media_asset(&asset).await?;

        job.progress = 75;
        self.advance(job, machine, JobState::Validating, None, None).await
    }

    async fn stage_validate(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .process
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.write_progress(&job.id, "validate", "validating", 80, None, None)
            .await;

        let asset = self.require_asset(&job.id).await?;
        let processed = primary_input(&asset)?;
        let existing = self.store.fetch_steps(&job.id).await?;
        let prior_failed_validates = existing
            .iter()
            .filter(|step| {
                step.step_type == StepType::Validate && step.status == StepStatus::Failed
            })
            .count();

        let spec = plan::probe_spec(&self.settings.ffprobe_bin, &processed);
        let failure = match self
            .run_planned_step(job, StepType::Validate, &spec, true, cancel)
            .await
        {
            Ok(StepRun::Executed(mut step, output)) => {
                let verdict = check_output(&asset, &output.stdout);
                if let Some(err) = &verdict {
                    // Semantic failures count against the one-shot
                    // re-processing budget exactly like command failures.
                    step.status = StepStatus::Failed;
                    step.error = Some(err.to_string());
                    self.store.update_step(&step).await?;
                }
                verdict
            }
            Ok(StepRun::AlreadyCompleted(_)) => None,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => Some(err),
        };

        match failure {
            None => {
                job.progress = 85;
                self.advance(job, machine, JobState::Packaged, None, None).await
            }
            Some(err) if prior_failed_validates >= 1 => Err(err),
            Some(err) => {
                self.audit(job, "validate", format!("validation failed: {err}"))
                    .await;
                self.advance(
                    job,
                    machine,
                    JobState::Processing,
                    Some(REVALIDATE_REASON),
                    Some(json!({ "error": err.to_string() })),
                )
                .await
            }
        }
    }

    async fn stage_package(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
    ) -> PipelineResult<()> {
        self.write_progress(&job.id, "packager", "packaging", 90, None, None)
            .await;

        let asset = self.require_asset(&job.id).await?;
        let work_dir = self.settings.working_root.join(&job.id);
        let sample = work_dir.join("sample.mkv");

        let mut set = PackageSet {
            video: asset.video_path.as_ref().map(PathBuf::from),
            subtitles: asset.subtitle_paths.iter().map(PathBuf::from).collect(),
            ..PackageSet::default()
        };
        if !asset.has_video {
            // Audio-only payloads package the processed audio as primary.
            set.audios = set.video.take().into_iter().collect();
        }
        if sample.is_file() {
            set.samples.push(sample);
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("owner".to_string(), json!(job.owner));
        metadata.insert("link".to_string(), json!(job.link));
        metadata.insert("kind".to_string(), json!(job.kind.as_str()));

        let job_id = job.id.clone();
        let root = self.settings.processed_root.clone();
        let packaged = tokio::task::spawn_blocking(move || package(&job_id, &set, &root, metadata))
            .await
            .map_err(|err| PipelineError::PackageFailure {
                operation: "package.join",
                message: err.to_string(),
            })?
            .map_err(map_package_error)?;

        self.store
            .set_manifest_path(&job.id, &packaged.manifest_path.to_string_lossy())
            .await?;
        self.audit(
            job,
            "package",
            format!(
                "packaged {} files, {} bytes",
                packaged.manifest.files.len(),
                packaged.manifest.total_size
            ),
        )
        .await;

        job.progress = 92;
        self.advance(job, machine, JobState::Uploaded, None, None).await
    }

    async fn stage_upload(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let _permit = self
            .limits
            .upload
            .acquire()
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        self.write_progress(&job.id, "upload", "uploading", 95, None, None)
            .await;

        let package_dir = self.settings.processed_root.join(&job.id);
        let manifest_path = package_dir.join(mediabot_package::MANIFEST_NAME);
        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|err| PipelineError::PackageFailure {
                operation: "manifest.read",
                message: err.to_string(),
            })?;
        let manifest: PackageManifest =
            serde_json::from_str(&raw).map_err(|err| PipelineError::PackageFailure {
                operation: "manifest.parse",
                message: err.to_string(),
            })?;

        let uploaded = self
            .uploads
            .upload(&package_dir, &job.id, &manifest, cancel)
            .await
            .map_err(map_upload_error)?;
        self.store.set_upload_manifest(&job.id, &uploaded).await?;
        self.audit(
            job,
            "upload",
            format!("delivered to {} at {}", uploaded.target, uploaded.location),
        )
        .await;

        job.progress = 100;
        self.advance(job, machine, JobState::Done, None, None).await
    }

    async fn finish(&self, job: &Job) {
        if let Err(err) = self.progress.delete(&job.id).await {
            warn!(job_id = %job.id, error = %err, "failed to delete progress record");
        }
        self.audit(job, "done", "pipeline complete").await;
        info!(job_id = %job.id, "job complete");
    }

    async fn cancel_job(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
    ) -> PipelineResult<JobState> {
        if machine.can_transition_to(JobState::Cancelled) {
            self.advance(job, machine, JobState::Cancelled, Some("cancelled"), None)
                .await?;
        }
        if let Err(err) = self.progress.delete(&job.id).await {
            warn!(job_id = %job.id, error = %err, "failed to delete progress record");
        }
        self.audit(job, "cancel", "job cancelled").await;
        Ok(JobState::Cancelled)
    }

    async fn fail_job(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        err: &PipelineError,
    ) -> PipelineResult<JobState> {
        let message = err.to_string();
        job.error = Some(message.clone());
        if machine.can_transition_to(JobState::Failed) {
            self.advance(
                job,
                machine,
                JobState::Failed,
                Some(&message),
                Some(json!({ "code": err.code(), "details": err.details() })),
            )
            .await?;
        }
        if let Err(delete_err) = self.progress.delete(&job.id).await {
            warn!(job_id = %job.id, error = %delete_err, "failed to delete progress record");
        }
        self.audit(job, "fail", format!("{} ({})", message, err.code()))
            .await;
        warn!(job_id = %job.id, code = err.code(), error = %message, "job failed");
        Ok(JobState::Failed)
    }

    /// Guard, persist, and record one state transition.
    async fn advance(
        &self,
        job: &mut Job,
        machine: &mut StateMachine,
        target: JobState,
        reason: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> PipelineResult<()> {
        let transition = machine
            .transition_to(target, reason.map(str::to_string), metadata)?
            .clone();
        self.store.append_transition(&job.id, &transition).await?;

        job.state = target;
        job.updated_at = Utc::now();
        job.terminal_at = target.is_terminal().then(|| job.updated_at);
        self.store.update_job(job).await?;

        self.audit(
            job,
            "state",
            format!("{} -> {}", transition.from.as_str(), target.as_str()),
        )
        .await;
        Ok(())
    }

    /// Create-or-reuse a step row for a planned command and run it.
    ///
    /// When `reuse_completed` is set, a completed step of the same type
    /// short-circuits without re-running (retry semantics); the
    /// revalidation pass clears it to force fresh rows.
    async fn run_planned_step(
        &self,
        job: &Job,
        step_type: StepType,
        spec: &CommandSpec,
        reuse_completed: bool,
        cancel: &CancellationToken,
    ) -> PipelineResult<StepRun> {
        let steps = self.store.fetch_steps(&job.id).await?;
        if reuse_completed {
            if let Some(done) = steps
                .iter()
                .rev()
                .find(|step| step.step_type == step_type && step.status == StepStatus::Completed)
            {
                return Ok(StepRun::AlreadyCompleted(done.clone()));
            }
        }

        let next_ordinal = steps.iter().map(|step| step.ordinal).max().unwrap_or(0) + 1;
        let mut step = ProcessingStep::planned(
            &job.id,
            next_ordinal,
            step_type,
            &spec.program,
            spec.args.clone(),
        );
        self.store.insert_step(&step).await?;
        let output = self.run_step(&mut step, spec, cancel).await?;
        Ok(StepRun::Executed(step, output))
    }

    async fn run_step(
        &self,
        step: &mut ProcessingStep,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> PipelineResult<CommandOutput> {
        step.status = StepStatus::Running;
        self.store.update_step(step).await?;

        match self
            .runner
            .run(spec, self.settings.step_timeout, cancel)
            .await
        {
            Ok(output) => {
                step.stdout = Some(output.stdout.clone());
                step.stderr = Some(output.stderr.clone());
                step.exit_code = output.exit_code;
                step.duration_ms = Some(output.duration_ms);
                if output.success() {
                    step.status = StepStatus::Completed;
                    self.store.update_step(step).await?;
                    Ok(output)
                } else {
                    let stderr = truncate_stderr(&output.stderr);
                    step.status = StepStatus::Failed;
                    step.error = Some(stderr.clone());
                    self.store.update_step(step).await?;
                    Err(PipelineError::CommandExecution {
                        command: spec.display(),
                        exit_code: output.exit_code,
                        stderr,
                    })
                }
            }
            Err(ExecError::Cancelled) => {
                step.status = StepStatus::Failed;
                step.error = Some("cancelled".to_string());
                self.store.update_step(step).await?;
                Err(PipelineError::Cancelled)
            }
            Err(err) => {
                step.status = StepStatus::Failed;
                step.error = Some(err.to_string());
                self.store.update_step(step).await?;
                Err(PipelineError::CommandExecution {
                    command: spec.display(),
                    exit_code: None,
                    stderr: err.to_string(),
                })
            }
        }
    }

    async fn require_asset(&self, job_id: &str) -> PipelineResult<MediaAsset> {
        self.store
            .fetch_media_asset(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity: "media_asset",
                id: job_id.to_string(),
            })
    }

    async fn write_progress(
        &self,
        job_id: &str,
        component: &str,
        status: &str,
        progress: u8,
        speed: Option<u64>,
        eta: Option<u64>,
    ) {
        let mut record = ProgressRecord::stage(job_id, component, status, progress);
        record.speed = speed;
        record.eta = eta;
        if let Err(err) = self.progress.put(&record).await {
            warn!(job_id, error = %err, "failed to write progress record");
        }
    }

    async fn audit(&self, job: &Job, stage: &str, message: impl Into<String>) {
        let entry = AuditEntry::now(&job.id, stage, message);
        if let Err(err) = self.store.append_audit(&entry).await {
            warn!(job_id = %job.id, error = %err, "failed to append audit entry");
        }
    }
}

enum StepRun {
    Executed(ProcessingStep, CommandOutput),
    AlreadyCompleted(ProcessingStep),
}

/// Semantic validation of the processed output; returns the failure when
/// the output does not line up with the source asset.
fn check_output(asset: &MediaAsset, probe_stdout: &str) -> Option<PipelineError> {
    let probe: MediaProbe = match media::parse_probe(probe_stdout) {
        Ok(probe) => probe,
        Err(err) => return Some(err),
    };
    if asset.has_video && !probe.has_video {
        return Some(PipelineError::Validation {
            field: "output",
            reason: "processed output lost its video stream".to_string(),
        });
    }
    if asset.has_audio && !probe.has_audio {
        return Some(PipelineError::Validation {
            field: "output",
            reason: "processed output lost its audio stream".to_string(),
        });
    }
    if let (Some(expected), Some(actual)) = (asset.duration_seconds, probe.duration_seconds) {
        if expected > 0.0 && ((actual - expected).abs() / expected) > 0.02 {
            return Some(PipelineError::Validation {
                field: "output",
                reason: format!(
                    "processed duration {actual:.2}s diverges from source {expected:.2}s"
                ),
            });
        }
    }
    None
}

struct StoreObserver {
    progress: Arc<dyn ProgressStore>,
}

#[async_trait]
impl ProgressObserver for StoreObserver {
    async fn transfer_progress(&self, job_id: &str, client: &'static str, status: &TransferStatus) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let progress = status.progress.clamp(0.0, 100.0) as u8;
        let mut record = ProgressRecord::stage(job_id, client, "downloading", progress);
        record.speed = Some(status.speed_bps);
        record.eta = status.eta_seconds;
        if let Err(err) = self.progress.put(&record).await {
            warn!(job_id, error = %err, "failed to write transfer progress");
        }
    }
}

fn map_download_error(err: DownloadError, link: &str) -> PipelineError {
    match err {
        DownloadError::Unsupported { .. } => PipelineError::UnsupportedLink {
            link: link.to_string(),
        },
        DownloadError::Client { client, message } => {
            PipelineError::DownloadClient { client, message }
        }
        DownloadError::Cancelled => PipelineError::Cancelled,
    }
}

fn map_package_error(err: mediabot_package::PackageError) -> PipelineError {
    let operation = match &err {
        mediabot_package::PackageError::Io { operation, .. } => *operation,
        mediabot_package::PackageError::MissingInput { .. } => "package.missing_input",
        mediabot_package::PackageError::Encode { .. } => "package.encode",
    };
    PipelineError::PackageFailure {
        operation,
        message: err.to_string(),
    }
}

fn map_upload_error(err: UploadError) -> PipelineError {
    match err {
        UploadError::Cancelled => PipelineError::Cancelled,
        UploadError::Target { target, message } => {
            PipelineError::UploadFailure { target, message }
        }
    }
}

/// Sort the produced files into a media asset, walking directories the
/// clients hand back whole.
fn categorize_files(job_id: &str, files: &[PathBuf]) -> MediaAsset {
    let mut flat = Vec::new();
    for path in files {
        if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() {
                    flat.push(entry.into_path());
                }
            }
        } else {
            flat.push(path.clone());
        }
    }

    let mut asset = MediaAsset {
        job_id: job_id.to_string(),
        ..MediaAsset::default()
    };
    let mut videos: Vec<PathBuf> = Vec::new();
    for path in flat {
        let kind = FileKind::from_extension(path.extension().and_then(|ext| ext.to_str()));
        match kind {
            FileKind::Video => videos.push(path),
            FileKind::Audio => asset.audio_paths.push(path.to_string_lossy().into_owned()),
            FileKind::Subtitle => asset
                .subtitle_paths
                .push(path.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    // Largest video wins as the primary payload.
    videos.sort_by_key(|path| std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0));
    asset.video_path = videos.pop().map(|path| path.to_string_lossy().into_owned());
    asset.has_video = asset.video_path.is_some();
    asset.has_audio = !asset.audio_paths.is_empty() || asset.has_video;
    asset.audio_paths.sort();
    asset.subtitle_paths.sort();
    asset
}

fn primary_input(asset: &MediaAsset) -> PipelineResult<PathBuf> {
    asset
        .video_path
        .as_ref()
        .or_else(|| asset.audio_paths.first())
        .map(PathBuf::from)
        .ok_or_else(|| PipelineError::Validation {
            field: "asset",
            reason: "media asset carries no playable file".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_prefers_largest_video_and_sorts_audio() {
        let dir = tempfile::TempDir::new().expect("dir");
        let small = dir.path().join("extra.mkv");
        let large = dir.path().join("feature.mkv");
        std::fs::write(&small, b"x").expect("write");
        std::fs::write(&large, b"xxxxxxxxxx").expect("write");
        let audio_b = dir.path().join("b.flac");
        let audio_a = dir.path().join("a.flac");
        std::fs::write(&audio_b, b"b").expect("write");
        std::fs::write(&audio_a, b"a").expect("write");

        let asset = categorize_files(
            "job-1",
            &[small, large.clone(), audio_b.clone(), audio_a.clone()],
        );
        assert_eq!(asset.video_path.as_deref(), Some(large.to_str().unwrap()));
        assert_eq!(
            asset.audio_paths,
            vec![
                audio_a.to_string_lossy().into_owned(),
                audio_b.to_string_lossy().into_owned()
            ]
        );
        assert!(asset.has_video);
        assert!(asset.has_audio);
    }

    #[test]
    fn categorize_walks_directories() {
        let dir = tempfile::TempDir::new().expect("dir");
        let nested = dir.path().join("release");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(nested.join("feature.mkv"), b"video").expect("write");
        std::fs::write(nested.join("feature.srt"), b"subs").expect("write");

        let asset = categorize_files("job-1", &[dir.path().to_path_buf()]);
        assert!(asset.video_path.is_some());
        assert_eq!(asset.subtitle_paths.len(), 1);
    }
}
