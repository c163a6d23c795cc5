#![forbid(unsafe_code)]

//! PostgreSQL adapter for the `JobStore` port.
//!
//! # Design
//! - SQL lives in module-level constants next to the store methods.
//! - Row structs mirror columns exactly; conversion into domain types is
//!   fallible so corrupt labels surface as decode errors instead of
//!   panics.
//! - Failures keep the backend diagnostic and are re-raised; nothing is
//!   swallowed here.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediabot_model::{
    AuditEntry, Download, Job, JobStore, MediaAsset, ProcessingStep, StateTransition,
    StoreError, StoreResult, SyncDecision, UploadManifest,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::error;

use rows::{AuditRow, DownloadRow, JobRow, MediaAssetRow, StepRow, SyncDecisionRow, TransitionRow};

const INSERT_JOB: &str = r"
    INSERT INTO jobs (id, owner_id, link, kind, priority, state, progress,
                      retry_count, error, created_at, updated_at, terminal_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
";

const SELECT_JOB: &str = r"SELECT * FROM jobs WHERE id = $1";

const SELECT_JOBS: &str = r"
    SELECT * FROM jobs
    WHERE ($1::TEXT IS NULL OR owner_id = $1)
    ORDER BY created_at DESC
    LIMIT $2
";

const UPDATE_JOB: &str = r"
    UPDATE jobs
    SET state = $2, progress = $3, retry_count = $4, error = $5,
        updated_at = $6, terminal_at = $7
    WHERE id = $1
";

const INSERT_TRANSITION: &str = r"
    INSERT INTO job_state_history (job_id, from_state, to_state, at, reason, metadata)
    VALUES ($1, $2, $3, $4, $5, $6)
";

const SELECT_HISTORY: &str = r"
    SELECT from_state, to_state, at, reason, metadata
    FROM job_state_history
    WHERE job_id = $1
    ORDER BY id
";

const INSERT_DOWNLOAD: &str = r"
    INSERT INTO downloads (id, job_id, link, kind, client, handle, status, progress,
                           speed_bps, eta_seconds, output_path, total_bytes,
                           retry_count, error, started_at, completed_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
";

const UPDATE_DOWNLOAD: &str = r"
    UPDATE downloads
    SET client = $2, handle = $3, status = $4, progress = $5, speed_bps = $6,
        eta_seconds = $7, output_path = $8, total_bytes = $9, retry_count = $10,
        error = $11, started_at = $12, completed_at = $13
    WHERE id = $1
";

const SELECT_DOWNLOADS: &str = r"SELECT * FROM downloads WHERE job_id = $1 ORDER BY started_at NULLS FIRST, id";

const UPSERT_MEDIA_ASSET: &str = r"
    INSERT INTO media_assets (job_id, video_path, audio_paths, subtitle_paths,
                              duration_seconds, has_video, has_audio)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (job_id) DO UPDATE
    SET video_path = EXCLUDED.video_path,
        audio_paths = EXCLUDED.audio_paths,
        subtitle_paths = EXCLUDED.subtitle_paths,
        duration_seconds = EXCLUDED.duration_seconds,
        has_video = EXCLUDED.has_video,
        has_audio = EXCLUDED.has_audio
";

const SELECT_MEDIA_ASSET: &str = r"SELECT * FROM media_assets WHERE job_id = $1";

const INSERT_STEP: &str = r"
    INSERT INTO processing_steps (id, job_id, ordinal, step_type, status, command,
                                  args, stdout, stderr, exit_code, duration_ms, error)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
";

const UPDATE_STEP: &str = r"
    UPDATE processing_steps
    SET status = $2, stdout = $3, stderr = $4, exit_code = $5, duration_ms = $6, error = $7
    WHERE id = $1
";

const SELECT_STEPS: &str = r"SELECT * FROM processing_steps WHERE job_id = $1 ORDER BY ordinal";

const UPSERT_SYNC_DECISION: &str = r"
    INSERT INTO sync_decisions (job_id, id, decision, offset_ms, stretch_ratio,
                                trim_regions, confidence, measurements, rationale, reject_reason)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (job_id) DO UPDATE
    SET id = EXCLUDED.id,
        decision = EXCLUDED.decision,
        offset_ms = EXCLUDED.offset_ms,
        stretch_ratio = EXCLUDED.stretch_ratio,
        trim_regions = EXCLUDED.trim_regions,
        confidence = EXCLUDED.confidence,
        measurements = EXCLUDED.measurements,
        rationale = EXCLUDED.rationale,
        reject_reason = EXCLUDED.reject_reason
";

const SELECT_SYNC_DECISION: &str = r"SELECT * FROM sync_decisions WHERE job_id = $1";

const INSERT_AUDIT: &str = r"
    INSERT INTO audit_log (job_id, at, stage, message, data)
    VALUES ($1, $2, $3, $4, $5)
";

const SELECT_AUDIT: &str = r"
    SELECT job_id, at, stage, message, data
    FROM audit_log
    WHERE job_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR at > $2)
    ORDER BY at
    LIMIT $3
";

const SET_MANIFEST_PATH: &str = r"UPDATE jobs SET manifest_path = $2, updated_at = now() WHERE id = $1";

const SET_UPLOAD_MANIFEST: &str =
    r"UPDATE jobs SET upload_manifest = $2, updated_at = now() WHERE id = $1";

/// Database-backed repository for jobs and their children.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Initialise the store, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns a backend error if migrations fail or the database is
    /// unreachable.
    pub async fn new(pool: PgPool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| StoreError::backend("store.migrate", err.to_string()))?;
        Ok(Self { pool })
    }

    /// Connect a pool and initialise the store in one call.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the connection or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| StoreError::backend("store.connect", err.to_string()))?;
        Self::new(pool).await
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        error!(operation, error = %err, "store operation failed");
        StoreError::backend(operation, err.to_string())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(INSERT_JOB)
            .bind(&job.id)
            .bind(&job.owner)
            .bind(&job.link)
            .bind(job.kind.as_str())
            .bind(job.priority.as_str())
            .bind(job.state.as_str())
            .bind(i16::from(job.progress))
            .bind(rows::clamp_i32(job.retry_count))
            .bind(job.error.as_deref())
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.terminal_at)
            .execute(&self.pool)
            .await
            .map_err(backend("job.create"))?;
        Ok(())
    }

    async fn fetch_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        sqlx::query_as::<_, JobRow>(SELECT_JOB)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("job.fetch"))?
            .map(Job::try_from)
            .transpose()
    }

    async fn update_job(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(UPDATE_JOB)
            .bind(&job.id)
            .bind(job.state.as_str())
            .bind(i16::from(job.progress))
            .bind(rows::clamp_i32(job.retry_count))
            .bind(job.error.as_deref())
            .bind(job.updated_at)
            .bind(job.terminal_at)
            .execute(&self.pool)
            .await
            .map_err(backend("job.update"))?;
        Ok(())
    }

    async fn list_jobs(&self, owner: Option<&str>, limit: i64) -> StoreResult<Vec<Job>> {
        sqlx::query_as::<_, JobRow>(SELECT_JOBS)
            .bind(owner)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("job.list"))?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn append_transition(
        &self,
        job_id: &str,
        transition: &StateTransition,
    ) -> StoreResult<()> {
        sqlx::query(INSERT_TRANSITION)
            .bind(job_id)
            .bind(transition.from.as_str())
            .bind(transition.to.as_str())
            .bind(transition.at)
            .bind(transition.reason.as_deref())
            .bind(transition.metadata.clone().map(Json))
            .execute(&self.pool)
            .await
            .map_err(backend("history.append"))?;
        Ok(())
    }

    async fn load_history(&self, job_id: &str) -> StoreResult<Vec<StateTransition>> {
        sqlx::query_as::<_, TransitionRow>(SELECT_HISTORY)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("history.load"))?
            .into_iter()
            .map(StateTransition::try_from)
            .collect()
    }

    async fn insert_download(&self, download: &Download) -> StoreResult<()> {
        sqlx::query(INSERT_DOWNLOAD)
            .bind(&download.id)
            .bind(&download.job_id)
            .bind(&download.link)
            .bind(&download.kind)
            .bind(download.client.as_deref())
            .bind(download.handle.as_deref())
            .bind(download.status.as_str())
            .bind(i16::from(download.progress))
            .bind(download.speed_bps.map(rows::clamp_i64))
            .bind(download.eta_seconds.map(rows::clamp_i64))
            .bind(download.output_path.as_deref())
            .bind(download.total_bytes.map(rows::clamp_i64))
            .bind(rows::clamp_i32(download.retry_count))
            .bind(download.error.as_deref())
            .bind(download.started_at)
            .bind(download.completed_at)
            .execute(&self.pool)
            .await
            .map_err(backend("download.insert"))?;
        Ok(())
    }

    async fn update_download(&self, download: &Download) -> StoreResult<()> {
        sqlx::query(UPDATE_DOWNLOAD)
            .bind(&download.id)
            .bind(download.client.as_deref())
            .bind(download.handle.as_deref())
            .bind(download.status.as_str())
            .bind(i16::from(download.progress))
            .bind(download.speed_bps.map(rows::clamp_i64))
            .bind(download.eta_seconds.map(rows::clamp_i64))
            .bind(download.output_path.as_deref())
            .bind(download.total_bytes.map(rows::clamp_i64))
            .bind(rows::clamp_i32(download.retry_count))
            .bind(download.error.as_deref())
            .bind(download.started_at)
            .bind(download.completed_at)
            .execute(&self.pool)
            .await
            .map_err(backend("download.update"))?;
        Ok(())
    }

    async fn fetch_downloads(&self, job_id: &str) -> StoreResult<Vec<Download>> {
        sqlx::query_as::<_, DownloadRow>(SELECT_DOWNLOADS)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("download.fetch"))?
            .into_iter()
            .map(Download::try_from)
            .collect()
    }

    async fn upsert_media_asset(&self, asset: &MediaAsset) -> StoreResult<()> {
        sqlx::query(UPSERT_MEDIA_ASSET)
            .bind(&asset.job_id)
            .bind(asset.video_path.as_deref())
            .bind(Json(&asset.audio_paths))
            .bind(Json(&asset.subtitle_paths))
            .bind(asset.duration_seconds)
            .bind(asset.has_video)
            .bind(asset.has_audio)
            .execute(&self.pool)
            .await
            .map_err(backend("asset.upsert"))?;
        Ok(())
    }

    async fn fetch_media_asset(&self, job_id: &str) -> StoreResult<Option<MediaAsset>> {
        Ok(sqlx::query_as::<_, MediaAssetRow>(SELECT_MEDIA_ASSET)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("asset.fetch"))?
            .map(MediaAsset::from))
    }

    async fn insert_step(&self, step: &ProcessingStep) -> StoreResult<()> {
        sqlx::query(INSERT_STEP)
            .bind(&step.id)
            .bind(&step.job_id)
            .bind(rows::clamp_i32(step.ordinal))
            .bind(step.step_type.as_str())
            .bind(step.status.as_str())
            .bind(&step.command)
            .bind(Json(&step.args))
            .bind(step.stdout.as_deref())
            .bind(step.stderr.as_deref())
            .bind(step.exit_code)
            .bind(step.duration_ms.map(rows::clamp_i64))
            .bind(step.error.as_deref())
            .execute(&self.pool)
            .await
            .map_err(backend("step.insert"))?;
        Ok(())
    }

    async fn update_step(&self, step: &ProcessingStep) -> StoreResult<()> {
        sqlx::query(UPDATE_STEP)
            .bind(&step.id)
            .bind(step.status.as_str())
            .bind(step.stdout.as_deref())
            .bind(step.stderr.as_deref())
            .bind(step.exit_code)
            .bind(step.duration_ms.map(rows::clamp_i64))
            .bind(step.error.as_deref())
            .execute(&self.pool)
            .await
            .map_err(backend("step.update"))?;
        Ok(())
    }

    async fn fetch_steps(&self, job_id: &str) -> StoreResult<Vec<ProcessingStep>> {
        sqlx::query_as::<_, StepRow>(SELECT_STEPS)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("step.fetch"))?
            .into_iter()
            .map(ProcessingStep::try_from)
            .collect()
    }

    async fn upsert_sync_decision(&self, decision: &SyncDecision) -> StoreResult<()> {
        let measurements = serde_json::to_value(decision.measurements)
            .map_err(|err| StoreError::backend("decision.encode", err.to_string()))?;
        let trim_regions = serde_json::to_value(&decision.trim_regions)
            .map_err(|err| StoreError::backend("decision.encode", err.to_string()))?;
        sqlx::query(UPSERT_SYNC_DECISION)
            .bind(&decision.job_id)
            .bind(&decision.id)
            .bind(decision.decision.as_str())
            .bind(decision.offset_ms)
            .bind(decision.stretch_ratio)
            .bind(Json(trim_regions))
            .bind(decision.confidence)
            .bind(Json(measurements))
            .bind(&decision.rationale)
            .bind(decision.reject_reason.as_deref())
            .execute(&self.pool)
            .await
            .map_err(backend("decision.upsert"))?;
        Ok(())
    }

    async fn fetch_sync_decision(&self, job_id: &str) -> StoreResult<Option<SyncDecision>> {
        sqlx::query_as::<_, SyncDecisionRow>(SELECT_SYNC_DECISION)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend("decision.fetch"))?
            .map(SyncDecision::try_from)
            .transpose()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(INSERT_AUDIT)
            .bind(&entry.job_id)
            .bind(entry.at)
            .bind(&entry.stage)
            .bind(&entry.message)
            .bind(entry.data.clone().map(Json))
            .execute(&self.pool)
            .await
            .map_err(backend("audit.append"))?;
        Ok(())
    }

    async fn fetch_audit(
        &self,
        job_id: &str,
        after: Option<DateTime<Utc>>,
        limit: i64,
    ) -> StoreResult<Vec<AuditEntry>> {
        Ok(sqlx::query_as::<_, AuditRow>(SELECT_AUDIT)
            .bind(job_id)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(backend("audit.fetch"))?
            .into_iter()
            .map(AuditEntry::from)
            .collect())
    }

    async fn set_manifest_path(&self, job_id: &str, manifest_path: &str) -> StoreResult<()> {
        sqlx::query(SET_MANIFEST_PATH)
            .bind(job_id)
            .bind(manifest_path)
            .execute(&self.pool)
            .await
            .map_err(backend("job.set_manifest"))?;
        Ok(())
    }

    async fn set_upload_manifest(
        &self,
        job_id: &str,
        manifest: &UploadManifest,
    ) -> StoreResult<()> {
        let payload = serde_json::to_value(manifest)
            .map_err(|err| StoreError::backend("job.set_upload_manifest", err.to_string()))?;
        sqlx::query(SET_UPLOAD_MANIFEST)
            .bind(job_id)
            .bind(Json(payload))
            .execute(&self.pool)
            .await
            .map_err(backend("job.set_upload_manifest"))?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(row) => row.try_get::<i32, _>(0).is_ok(),
            Err(err) => {
                error!(error = %err, "store ping failed");
                false
            }
        }
    }
}
