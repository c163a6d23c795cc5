//! Ephemeral per-job progress record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-known state of a running stage, keyed by job id in the ephemeral
/// store. Overwritten on every update; only the job's driver writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Owning job.
    pub job_id: String,
    /// Component tag for the stage currently reporting (`torrent`,
    /// `packager`, ...).
    pub downloader: String,
    /// Stage progress, 0..=100.
    pub progress: u8,
    /// Transfer rate in bytes per second, when the stage has one.
    pub speed: Option<u64>,
    /// Estimated seconds remaining, when the stage has one.
    pub eta: Option<u64>,
    /// Stage status label.
    pub status: String,
    /// Stage error, when reporting a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When this record was written.
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Build a record for a stage update.
    #[must_use]
    pub fn stage(job_id: &str, component: &str, status: &str, progress: u8) -> Self {
        Self {
            job_id: job_id.to_string(),
            downloader: component.to_string(),
            progress,
            speed: None,
            eta: None,
            status: status.to_string(),
            error: None,
            updated_at: Utc::now(),
        }
    }
}
