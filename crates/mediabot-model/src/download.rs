//! Download rows owned by a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a single transfer handed to an external client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Recorded, not yet handed to a client.
    Pending,
    /// Actively transferring.
    Downloading,
    /// Paused inside the client.
    Paused,
    /// Finished; output path and total bytes are set, progress is 100.
    Completed,
    /// Client reported a failure.
    Failed,
    /// Removed on request.
    Cancelled,
}

impl DownloadStatus {
    /// Stable label used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One transfer attempt for a job's source link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
    /// Download identifier.
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// Source link as routed.
    pub link: String,
    /// Classified link kind label (`magnet`, `https`, ...).
    pub kind: String,
    /// Name of the client that took the transfer.
    pub client: Option<String>,
    /// Client-assigned transfer handle, once started.
    pub handle: Option<String>,
    /// Transfer status.
    pub status: DownloadStatus,
    /// Transfer progress, 0..=100.
    pub progress: u8,
    /// Last observed transfer rate in bytes per second.
    pub speed_bps: Option<u64>,
    /// Last observed ETA in seconds.
    pub eta_seconds: Option<u64>,
    /// Directory or file the client produced, set on completion.
    pub output_path: Option<String>,
    /// Payload size in bytes, set on completion (estimated earlier where
    /// the client reports it).
    pub total_bytes: Option<u64>,
    /// Transfer-level retries inside the client.
    pub retry_count: u32,
    /// Client diagnostic on failure, verbatim.
    pub error: Option<String>,
    /// When the client accepted the transfer.
    pub started_at: Option<DateTime<Utc>>,
    /// When the transfer completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Download {
    /// Record a pending transfer for a classified link.
    #[must_use]
    pub fn pending(job_id: &str, link: &str, kind: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            link: link.to_string(),
            kind: kind.to_string(),
            client: None,
            handle: None,
            status: DownloadStatus::Pending,
            progress: 0,
            speed_bps: None,
            eta_seconds: None,
            output_path: None,
            total_bytes: None,
            retry_count: 0,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the transfer completed, satisfying the completion invariant.
    pub fn complete(&mut self, output_path: &str, total_bytes: u64) {
        self.status = DownloadStatus::Completed;
        self.progress = 100;
        self.output_path = Some(output_path.to_string());
        self.total_bytes = Some(total_bytes);
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_sets_invariant_fields() {
        let mut download = Download::pending("job-1", "https://example.test/a.mkv", "https");
        download.started_at = Some(Utc::now());
        download.complete("/data/work/job-1", 2_048);
        assert_eq!(download.status, DownloadStatus::Completed);
        assert_eq!(download.progress, 100);
        assert_eq!(download.total_bytes, Some(2_048));
        assert!(download.output_path.is_some());
        assert!(download.completed_at >= download.started_at);
    }
}
