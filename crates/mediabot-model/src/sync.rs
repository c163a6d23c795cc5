//! Sync measurement inputs and the persisted correction decision.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A span of media time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanMs {
    /// Inclusive start of the span.
    pub start_ms: f64,
    /// Exclusive end of the span.
    pub end_ms: f64,
}

/// Offsets measured at three points of the timeline, in milliseconds.
/// Positive means the audio lags the video.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetMeasurements {
    /// Offset near the start anchor.
    pub start_offset_ms: f64,
    /// Offset near the middle of the timeline.
    pub middle_offset_ms: f64,
    /// Offset near the end of the timeline.
    pub end_offset_ms: f64,
    /// Linear growth of the offset, milliseconds per second.
    pub drift_ms_per_second: f64,
}

/// A video/audio timestamp correspondence used as sync evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPoint {
    /// Timestamp on the video timeline.
    pub video_ms: f64,
    /// Matching timestamp on the audio timeline.
    pub audio_ms: f64,
    /// Evidence confidence, 0..=1.
    pub confidence: f64,
}

/// One measurement method's estimate of the start offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodEstimate {
    /// Method name (e.g. `cross-correlation`, `fingerprint`).
    pub method: String,
    /// The method's start-anchor offset estimate in milliseconds.
    pub start_offset_ms: f64,
    /// The method's own confidence, 0..=1.
    pub confidence: f64,
}

/// Everything the measurement oracle reports for one payload.
///
/// The decision engine is pure over this struct; it never triggers a
/// measurement itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeasurements {
    /// Probed video duration in seconds.
    pub video_duration_seconds: f64,
    /// Probed audio duration in seconds.
    pub audio_duration_seconds: f64,
    /// Silence available at the head of the audio, in milliseconds.
    pub leading_silence_ms: f64,
    /// Silence available at the tail of the audio, in milliseconds.
    pub trailing_silence_ms: f64,
    /// Interior silence regions.
    #[serde(default)]
    pub silence_regions: Vec<SpanMs>,
    /// Anchor-point correspondences.
    #[serde(default)]
    pub anchors: Vec<AnchorPoint>,
    /// Multi-point offsets plus drift.
    pub offsets: OffsetMeasurements,
    /// Per-method start-offset estimates.
    #[serde(default)]
    pub methods: Vec<MethodEstimate>,
    /// Aggregate measurement confidence, 0..=1.
    pub confidence: f64,
}

/// The single primary correction the engine may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecisionKind {
    /// Streams are in sync; no correction.
    None,
    /// Shift the audio later by the recorded offset.
    Delay,
    /// Time-stretch the audio by the recorded ratio.
    Stretch,
    /// Drop leading audio equal to the recorded offset.
    Trim,
    /// Prepend silence equal to the recorded offset.
    Pad,
    /// Refuse to correct; the job fails with the recorded reason.
    Reject,
}

impl SyncDecisionKind {
    /// Stable label used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Delay => "delay",
            Self::Stretch => "stretch",
            Self::Trim => "trim",
            Self::Pad => "pad",
            Self::Reject => "reject",
        }
    }

    /// Parse a persisted label back into a kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "none" => Some(Self::None),
            "delay" => Some(Self::Delay),
            "stretch" => Some(Self::Stretch),
            "trim" => Some(Self::Trim),
            "pad" => Some(Self::Pad),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Persisted outcome of the sync decision engine for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDecision {
    /// Decision identifier.
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// Primary correction (exactly one; combined corrections are refused).
    pub decision: SyncDecisionKind,
    /// Signed correction magnitude in milliseconds for delay/trim/pad.
    pub offset_ms: Option<i64>,
    /// Audio stretch ratio for `stretch`.
    pub stretch_ratio: Option<f64>,
    /// Regions to trim, when the correction removes interior audio.
    #[serde(default)]
    pub trim_regions: Vec<SpanMs>,
    /// Confidence carried over from the measurements, 0..=1.
    pub confidence: f64,
    /// The offsets the decision was made from.
    pub measurements: OffsetMeasurements,
    /// Human-readable explanation of the decision.
    pub rationale: String,
    /// Rejection reason when `decision` is `reject`.
    pub reject_reason: Option<String>,
}

impl SyncDecision {
    /// Shell for a decision on a job; the engine fills the verdict fields.
    #[must_use]
    pub fn for_job(job_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            decision: SyncDecisionKind::None,
            offset_ms: None,
            stretch_ratio: None,
            trim_regions: Vec::new(),
            confidence: 0.0,
            measurements: OffsetMeasurements::default(),
            rationale: String::new(),
            reject_reason: None,
        }
    }
}
