//! Processing step rows: one persisted external-command invocation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work a processing step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// Container/stream probe of the downloaded payload.
    Probe,
    /// Measurement run feeding the sync decision engine.
    SyncAnalyze,
    /// Corrective (or copy) remux.
    Mux,
    /// Short preview cut of the processed output.
    SampleGen,
    /// Post-processing verification of the output.
    Validate,
}

impl StepType {
    /// Stable label used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::SyncAnalyze => "sync-analyze",
            Self::Mux => "mux",
            Self::SampleGen => "sample-gen",
            Self::Validate => "validate",
        }
    }

    /// Parse a persisted label back into a type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "probe" => Some(Self::Probe),
            "sync-analyze" => Some(Self::SyncAnalyze),
            "mux" => Some(Self::Mux),
            "sample-gen" => Some(Self::SampleGen),
            "validate" => Some(Self::Validate),
            _ => None,
        }
    }
}

/// Step lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Planned, not yet started.
    Pending,
    /// Command currently executing.
    Running,
    /// Command exited zero and passed its semantic check.
    Completed,
    /// Command failed; the row records exit code and stderr.
    Failed,
    /// Not applicable for this job (e.g. single-stream payload).
    Skipped,
}

impl StepStatus {
    /// Stable label used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse a persisted label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Persisted record of one external-command invocation within a job.
///
/// Ordinals for a job form a dense 1-based sequence; no step runs while an
/// earlier step of the same job is still pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    /// Step identifier.
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// 1-based position within the job, unique per job.
    pub ordinal: u32,
    /// Kind of work.
    pub step_type: StepType,
    /// Lifecycle status.
    pub status: StepStatus,
    /// Program executed.
    pub command: String,
    /// Argument vector, exactly as passed to the process.
    pub args: Vec<String>,
    /// Captured stdout.
    pub stdout: Option<String>,
    /// Captured stderr.
    pub stderr: Option<String>,
    /// Subprocess exit code, recorded verbatim.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Failure detail when the step failed.
    pub error: Option<String>,
}

impl ProcessingStep {
    /// Plan a pending step at the given ordinal.
    #[must_use]
    pub fn planned(
        job_id: &str,
        ordinal: u32,
        step_type: StepType,
        command: &str,
        args: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            ordinal,
            step_type,
            status: StepStatus::Pending,
            command: command.to_string(),
            args,
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_labels_round_trip() {
        for step_type in [
            StepType::Probe,
            StepType::SyncAnalyze,
            StepType::Mux,
            StepType::SampleGen,
            StepType::Validate,
        ] {
            assert_eq!(StepType::parse(step_type.as_str()), Some(step_type));
        }
    }

    #[test]
    fn planned_step_is_pending() {
        let step = ProcessingStep::planned("job-1", 1, StepType::Probe, "ffprobe", vec![]);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(step.ordinal, 1);
        assert!(step.exit_code.is_none());
    }
}
