//! Job aggregate root and its media asset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::JobState;

/// What the user asked the pipeline to do with the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Fetch the content and stop after the download completes.
    Download,
    /// Fetch and probe/measure, but apply no correction.
    AnalyzeOnly,
    /// Run the whole pipeline through packaging and upload.
    FullPipeline,
}

impl JobKind {
    /// Stable label used in persistence and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::AnalyzeOnly => "analyze-only",
            Self::FullPipeline => "full-pipeline",
        }
    }

    /// Parse a persisted label back into a kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "download" => Some(Self::Download),
            "analyze-only" => Some(Self::AnalyzeOnly),
            "full-pipeline" => Some(Self::FullPipeline),
            _ => None,
        }
    }
}

/// Scheduling weight for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Background work; yields to everything else.
    Low,
    /// Default weight.
    #[default]
    Normal,
    /// Jump the queue where the chosen client supports it.
    High,
}

impl JobPriority {
    /// Stable label used in persistence and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Parse a persisted label back into a priority.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Map the numeric API form (0 = low, 1 = normal, 2 = high).
    #[must_use]
    pub const fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::Low,
            1 => Self::Normal,
            _ => Self::High,
        }
    }
}

/// One user-initiated pipeline attempt for one source link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque job identifier.
    pub id: String,
    /// Identifier of the submitting user or surface.
    pub owner: String,
    /// Original link exactly as submitted.
    pub link: String,
    /// Requested pipeline depth.
    pub kind: JobKind,
    /// Scheduling weight.
    pub priority: JobPriority,
    /// Current lifecycle state; always equals the `to` of the latest
    /// transition in the job's state history.
    pub state: JobState,
    /// Coarse overall progress, 0..=100.
    pub progress: u8,
    /// Number of user-initiated re-entries after FAILED/CANCELLED.
    pub retry_count: u32,
    /// Last stage failure, if any.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set once the job reaches DONE or FAILED.
    pub terminal_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a fresh PENDING job for a submitted link.
    #[must_use]
    pub fn new(owner: &str, link: &str, kind: JobKind, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            link: link.trim().to_string(),
            kind,
            priority,
            state: JobState::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
            terminal_at: None,
        }
    }
}

/// The media payload a job produced during its download stage.
///
/// A job owns at most one asset; paths are absolute on the engine host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    /// Owning job identifier.
    pub job_id: String,
    /// Primary video container, when the payload has one.
    pub video_path: Option<String>,
    /// External audio tracks, sorted by path.
    pub audio_paths: Vec<String>,
    /// Subtitle files, sorted by path.
    pub subtitle_paths: Vec<String>,
    /// Container duration in seconds as reported by the probe.
    pub duration_seconds: Option<f64>,
    /// Whether the probe found at least one video stream.
    pub has_video: bool,
    /// Whether the probe found at least one audio stream.
    pub has_audio: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_round_trip() {
        for kind in [JobKind::Download, JobKind::AnalyzeOnly, JobKind::FullPipeline] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("transcode"), None);
    }

    #[test]
    fn priority_levels_map_to_variants() {
        assert_eq!(JobPriority::from_level(-3), JobPriority::Low);
        assert_eq!(JobPriority::from_level(0), JobPriority::Low);
        assert_eq!(JobPriority::from_level(1), JobPriority::Normal);
        assert_eq!(JobPriority::from_level(7), JobPriority::High);
    }

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new("cli", " magnet:?xt=urn:btih:abc ", JobKind::Download, JobPriority::Normal);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.link, "magnet:?xt=urn:btih:abc");
        assert_eq!(job.progress, 0);
        assert!(job.terminal_at.is_none());
    }
}
