//! Append-only audit log entries for a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a job's ordered audit stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Owning job.
    pub job_id: String,
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
    /// Stage or component that produced the entry.
    pub stage: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Record an audit message for a stage.
    #[must_use]
    pub fn now(job_id: &str, stage: &str, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            at: Utc::now(),
            stage: stage.to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured context to the entry.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
