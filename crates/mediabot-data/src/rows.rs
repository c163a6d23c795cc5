//! Row structs mirroring the migration schema, plus fallible conversions
//! into domain types. Corrupt labels become decode errors, never panics.

use chrono::{DateTime, Utc};
use mediabot_model::{
    AuditEntry, Download, DownloadStatus, Job, JobKind, JobPriority, JobState, MediaAsset,
    OffsetMeasurements, ProcessingStep, SpanMs, StateTransition, StepStatus, StepType,
    StoreError, SyncDecision, SyncDecisionKind,
};
use sqlx::FromRow;
use sqlx::types::Json;

pub(crate) fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn to_progress(value: i16) -> u8 {
    u8::try_from(value.clamp(0, 100)).unwrap_or(100)
}

fn parse_label<T>(
    operation: &'static str,
    label: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(label).ok_or_else(|| StoreError::decode(operation, format!("unknown label `{label}`")))
}

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    id: String,
    owner_id: String,
    link: String,
    kind: String,
    priority: String,
    state: String,
    progress: i16,
    retry_count: i32,
    error: Option<String>,
    #[allow(dead_code)]
    manifest_path: Option<String>,
    #[allow(dead_code)]
    upload_manifest: Option<Json<serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    terminal_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner: row.owner_id,
            link: row.link,
            kind: parse_label("job.decode", &row.kind, JobKind::parse)?,
            priority: parse_label("job.decode", &row.priority, JobPriority::parse)?,
            state: parse_label("job.decode", &row.state, JobState::parse)?,
            progress: to_progress(row.progress),
            retry_count: to_u32(row.retry_count),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            terminal_at: row.terminal_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TransitionRow {
    from_state: String,
    to_state: String,
    at: DateTime<Utc>,
    reason: Option<String>,
    metadata: Option<Json<serde_json::Value>>,
}

impl TryFrom<TransitionRow> for StateTransition {
    type Error = StoreError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            from: parse_label("history.decode", &row.from_state, JobState::parse)?,
            to: parse_label("history.decode", &row.to_state, JobState::parse)?,
            at: row.at,
            reason: row.reason,
            metadata: row.metadata.map(|Json(value)| value),
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct DownloadRow {
    id: String,
    job_id: String,
    link: String,
    kind: String,
    client: Option<String>,
    handle: Option<String>,
    status: String,
    progress: i16,
    speed_bps: Option<i64>,
    eta_seconds: Option<i64>,
    output_path: Option<String>,
    total_bytes: Option<i64>,
    retry_count: i32,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DownloadRow> for Download {
    type Error = StoreError;

    fn try_from(row: DownloadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            link: row.link,
            kind: row.kind,
            client: row.client,
            handle: row.handle,
            status: parse_label("download.decode", &row.status, DownloadStatus::parse)?,
            progress: to_progress(row.progress),
            speed_bps: row.speed_bps.map(to_u64),
            eta_seconds: row.eta_seconds.map(to_u64),
            output_path: row.output_path,
            total_bytes: row.total_bytes.map(to_u64),
            retry_count: to_u32(row.retry_count),
            error: row.error,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MediaAssetRow {
    job_id: String,
    video_path: Option<String>,
    audio_paths: Json<Vec<String>>,
    subtitle_paths: Json<Vec<String>>,
    duration_seconds: Option<f64>,
    has_video: bool,
    has_audio: bool,
}

impl From<MediaAssetRow> for MediaAsset {
    fn from(row: MediaAssetRow) -> Self {
        Self {
            job_id: row.job_id,
            video_path: row.video_path,
            audio_paths: row.audio_paths.0,
            subtitle_paths: row.subtitle_paths.0,
            duration_seconds: row.duration_seconds,
            has_video: row.has_video,
            has_audio: row.has_audio,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct StepRow {
    id: String,
    job_id: String,
    ordinal: i32,
    step_type: String,
    status: String,
    command: String,
    args: Json<Vec<String>>,
    stdout: Option<String>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    duration_ms: Option<i64>,
    error: Option<String>,
}

impl TryFrom<StepRow> for ProcessingStep {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            ordinal: to_u32(row.ordinal),
            step_type: parse_label("step.decode", &row.step_type, StepType::parse)?,
            status: parse_label("step.decode", &row.status, StepStatus::parse)?,
            command: row.command,
            args: row.args.0,
            stdout: row.stdout,
            stderr: row.stderr,
            exit_code: row.exit_code,
            duration_ms: row.duration_ms.map(to_u64),
            error: row.error,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SyncDecisionRow {
    job_id: String,
    id: String,
    decision: String,
    offset_ms: Option<i64>,
    stretch_ratio: Option<f64>,
    trim_regions: Json<serde_json::Value>,
    confidence: f64,
    measurements: Json<serde_json::Value>,
    rationale: String,
    reject_reason: Option<String>,
}

impl TryFrom<SyncDecisionRow> for SyncDecision {
    type Error = StoreError;

    fn try_from(row: SyncDecisionRow) -> Result<Self, Self::Error> {
        let measurements: OffsetMeasurements = serde_json::from_value(row.measurements.0)
            .map_err(|err| StoreError::decode("decision.decode", err.to_string()))?;
        let trim_regions: Vec<SpanMs> = serde_json::from_value(row.trim_regions.0)
            .map_err(|err| StoreError::decode("decision.decode", err.to_string()))?;
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            decision: parse_label("decision.decode", &row.decision, SyncDecisionKind::parse)?,
            offset_ms: row.offset_ms,
            stretch_ratio: row.stretch_ratio,
            trim_regions,
            confidence: row.confidence,
            measurements,
            rationale: row.rationale,
            reject_reason: row.reject_reason,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AuditRow {
    job_id: String,
    at: DateTime<Utc>,
    stage: String,
    message: String,
    data: Option<Json<serde_json::Value>>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            job_id: row.job_id,
            at: row.at,
            stage: row.stage,
            message: row.message,
            data: row.data.map(|Json(value)| value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_preserve_range() {
        assert_eq!(clamp_i64(42), 42);
        assert_eq!(clamp_i64(u64::MAX), i64::MAX);
        assert_eq!(clamp_i32(7), 7);
        assert_eq!(clamp_i32(u32::MAX), i32::MAX);
        assert_eq!(to_progress(150), 100);
        assert_eq!(to_progress(-5), 0);
    }

    #[test]
    fn job_row_decodes_labels() {
        let row = JobRow {
            id: "job-1".into(),
            owner_id: "api".into(),
            link: "magnet:?xt=urn:btih:abc".into(),
            kind: "download".into(),
            priority: "normal".into(),
            state: "DOWNLOADING".into(),
            progress: 40,
            retry_count: 1,
            error: None,
            manifest_path: None,
            upload_manifest: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            terminal_at: None,
        };
        let job = Job::try_from(row).expect("decodes");
        assert_eq!(job.kind, JobKind::Download);
        assert_eq!(job.state, JobState::Downloading);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn corrupt_state_label_is_a_decode_error() {
        let row = TransitionRow {
            from_state: "PENDING".into(),
            to_state: "SHIPPING".into(),
            at: Utc::now(),
            reason: None,
            metadata: None,
        };
        let err = StateTransition::try_from(row).expect_err("must fail");
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn decision_row_round_trips_measurements() {
        let measurements = OffsetMeasurements {
            start_offset_ms: 802.0,
            middle_offset_ms: 804.0,
            end_offset_ms: 806.0,
            drift_ms_per_second: 0.05,
        };
        let row = SyncDecisionRow {
            job_id: "job-1".into(),
            id: "dec-1".into(),
            decision: "delay".into(),
            offset_ms: Some(804),
            stretch_ratio: None,
            trim_regions: Json(serde_json::json!([])),
            confidence: 0.9,
            measurements: Json(serde_json::to_value(measurements).expect("encode")),
            rationale: "multi-point agreement".into(),
            reject_reason: None,
        };
        let decision = SyncDecision::try_from(row).expect("decodes");
        assert_eq!(decision.decision, SyncDecisionKind::Delay);
        assert_eq!(decision.measurements, measurements);
    }
}
