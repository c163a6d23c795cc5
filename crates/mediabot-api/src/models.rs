//! Request and response payloads for the job API.

use chrono::{DateTime, Utc};
use mediabot_model::{AuditEntry, Download, Job, ProcessingStep, SyncDecision};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// Job kind label (`download`, `analyze-only`, `full-pipeline`).
    #[serde(rename = "type")]
    pub kind: String,
    /// The link to acquire.
    pub source: String,
    /// Optional submission knobs.
    #[serde(default)]
    pub options: SubmitJobOptions,
}

/// Optional knobs accompanying a submission.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobOptions {
    /// Preferred output name; recorded in the job metadata.
    pub output_name: Option<String>,
    /// Numeric priority (0 low, 1 normal, 2 high).
    pub priority: Option<i32>,
    /// Client preference hint; accepted and currently informational.
    pub client: Option<String>,
}

/// Compact job view returned from submission and retry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Job identifier.
    pub id: String,
    /// Current state label.
    pub status: String,
    /// Job kind label.
    #[serde(rename = "type")]
    pub kind: String,
    /// Original link.
    pub source: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.state.as_str().to_string(),
            kind: job.kind.as_str().to_string(),
            source: job.link.clone(),
            created_at: job.created_at,
        }
    }
}

/// Envelope for submission and retry responses.
#[derive(Debug, Serialize)]
pub struct JobEnvelope {
    /// The affected job.
    pub job: JobSummary,
}

/// Full job view, including children.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    /// The job row.
    pub job: Job,
    /// Download attempts, oldest first.
    pub downloads: Vec<Download>,
    /// Processing steps ordered by ordinal.
    pub steps: Vec<ProcessingStep>,
    /// The sync decision, when one was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_decision: Option<SyncDecision>,
}

/// Query parameters of the logs endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Maximum entries to return (default 100).
    pub limit: Option<i64>,
    /// Only entries strictly after this timestamp.
    pub after: Option<DateTime<Utc>>,
}

/// Response of the logs endpoint.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    /// Matching audit entries, oldest first.
    pub entries: Vec<AuditEntry>,
}
