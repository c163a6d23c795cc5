#![forbid(unsafe_code)]

//! Sync decision engine.
//!
//! Turns the measurement oracle's output into exactly one bounded
//! correction, or a rejection. The engine is deterministic and pure over
//! its inputs; it never triggers a measurement. Same-duration does not
//! imply sync here: multi-method agreement at the start anchor is the only
//! admissible evidence, and the engine refuses rather than compounds
//! corrections.

use serde::{Deserialize, Serialize};

use mediabot_model::{
    OffsetMeasurements, SyncDecision, SyncDecisionKind, SyncMeasurements,
};

/// Rejection reason for insufficient or disagreeing evidence.
pub const REASON_LOW_CONFIDENCE: &str = "low-confidence";
/// Rejection reason for drift combined with symptoms it cannot explain.
pub const REASON_MIXED_SYMPTOMS: &str = "mixed-symptoms";
/// Rejection reason for a stretch ratio outside the safe clamp.
pub const REASON_STRETCH_OUT_OF_RANGE: &str = "stretch-out-of-range";

/// Tunable decision thresholds. The defaults are the shipped behaviour;
/// deployments override them through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncThresholds {
    /// Offsets at or below this are considered in sync, in milliseconds.
    pub in_sync_ms: f64,
    /// Minor severity boundary, in milliseconds.
    pub minor_ms: f64,
    /// Moderate severity boundary, in milliseconds.
    pub moderate_ms: f64,
    /// Severe severity boundary, in milliseconds.
    pub severe_ms: f64,
    /// Drift at or above this is significant, in milliseconds per second.
    pub drift_significant_ms_per_second: f64,
    /// Minimum aggregate confidence for any correction.
    pub confidence_floor: f64,
    /// Two methods agree when their start estimates are within this many
    /// milliseconds.
    pub method_agreement_ms: f64,
    /// Lower bound of the admissible stretch ratio.
    pub stretch_min: f64,
    /// Upper bound of the admissible stretch ratio.
    pub stretch_max: f64,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self {
            in_sync_ms: 40.0,
            minor_ms: 100.0,
            moderate_ms: 300.0,
            severe_ms: 1000.0,
            drift_significant_ms_per_second: 2.0,
            confidence_floor: 0.70,
            method_agreement_ms: 50.0,
            stretch_min: 0.97,
            stretch_max: 1.03,
        }
    }
}

/// Deterministic decision engine over oracle measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionEngine {
    thresholds: SyncThresholds,
}

impl DecisionEngine {
    /// Engine with explicit thresholds.
    #[must_use]
    pub const fn new(thresholds: SyncThresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds this engine decides with.
    #[must_use]
    pub const fn thresholds(&self) -> &SyncThresholds {
        &self.thresholds
    }

    /// Produce the correction plan (or rejection) for a job's measurements.
    #[must_use]
    pub fn decide(&self, job_id: &str, measurements: &SyncMeasurements) -> SyncDecision {
        let t = &self.thresholds;
        let offsets = measurements.offsets;
        let mut decision = SyncDecision::for_job(job_id);
        decision.confidence = measurements.confidence;
        decision.measurements = offsets;

        // Evidence gate: at least two independent methods must agree at
        // the start anchor, and the aggregate confidence must clear the
        // floor, before any verdict is admissible.
        if !methods_agree(measurements, t.method_agreement_ms) {
            return reject(
                decision,
                REASON_LOW_CONFIDENCE,
                "fewer than two measurement methods agree at the start anchor",
            );
        }
        if measurements.confidence < t.confidence_floor {
            return reject(
                decision,
                REASON_LOW_CONFIDENCE,
                "aggregate confidence below the floor",
            );
        }

        let median = median3(
            offsets.start_offset_ms,
            offsets.middle_offset_ms,
            offsets.end_offset_ms,
        );
        let duration_seconds = measurements.video_duration_seconds.max(f64::EPSILON);
        let spread_rate = (offsets.start_offset_ms - offsets.end_offset_ms).abs() / duration_seconds;
        let worst = offsets
            .start_offset_ms
            .abs()
            .max(offsets.middle_offset_ms.abs())
            .max(offsets.end_offset_ms.abs());

        if spread_rate < t.drift_significant_ms_per_second && worst <= t.in_sync_ms {
            decision.decision = SyncDecisionKind::None;
            decision.rationale =
                "all offsets within the in-sync threshold; drift insignificant".to_string();
            return decision;
        }

        if spread_rate >= t.drift_significant_ms_per_second {
            return self.decide_drift(decision, measurements, median);
        }

        if median > 0.0 {
            decision.decision = SyncDecisionKind::Delay;
            decision.offset_ms = Some(round_ms(median));
            decision.rationale = format!(
                "multi-point agreement; drift insignificant; shifting audio later by {} ms",
                round_ms(median)
            );
            return decision;
        }

        // Negative constant offset: consume leading silence when there is
        // enough of it, otherwise pad.
        let magnitude = median.abs();
        if magnitude < measurements.leading_silence_ms {
            decision.decision = SyncDecisionKind::Trim;
            decision.offset_ms = Some(round_ms(magnitude));
            decision.rationale = format!(
                "constant negative offset within leading silence; trimming {} ms",
                round_ms(magnitude)
            );
        } else {
            decision.decision = SyncDecisionKind::Pad;
            decision.offset_ms = Some(round_ms(magnitude));
            decision.rationale = format!(
                "constant negative offset beyond leading silence; padding {} ms",
                round_ms(magnitude)
            );
        }
        decision
    }

    fn decide_drift(
        &self,
        mut decision: SyncDecision,
        measurements: &SyncMeasurements,
        median: f64,
    ) -> SyncDecision {
        let t = &self.thresholds;
        let offsets = measurements.offsets;
        let signs_agree = offsets.start_offset_ms.signum() == offsets.end_offset_ms.signum()
            && offsets.start_offset_ms != 0.0
            && offsets.end_offset_ms != 0.0;

        if !signs_agree || median.abs() > t.severe_ms {
            return reject(
                decision,
                REASON_MIXED_SYMPTOMS,
                "drift combined with a constant offset it cannot explain",
            );
        }

        let audio_seconds = measurements.audio_duration_seconds.max(f64::EPSILON);
        let ratio = (audio_seconds
            - offsets.drift_ms_per_second * measurements.video_duration_seconds / 1000.0)
            / audio_seconds;
        if ratio < t.stretch_min || ratio > t.stretch_max {
            return reject(
                decision,
                REASON_STRETCH_OUT_OF_RANGE,
                "required stretch ratio outside the safe clamp",
            );
        }

        decision.decision = SyncDecisionKind::Stretch;
        decision.stretch_ratio = Some(ratio);
        decision.rationale = format!(
            "significant linear drift with agreeing signs; stretching audio by ratio {ratio:.5}"
        );
        decision
    }
}

fn methods_agree(measurements: &SyncMeasurements, within_ms: f64) -> bool {
    let methods = &measurements.methods;
    if methods.len() < 2 {
        return false;
    }
    methods.iter().enumerate().any(|(index, a)| {
        methods
            .iter()
            .skip(index + 1)
            .any(|b| (a.start_offset_ms - b.start_offset_ms).abs() <= within_ms)
    })
}

fn reject(mut decision: SyncDecision, reason: &str, detail: &str) -> SyncDecision {
    decision.decision = SyncDecisionKind::Reject;
    decision.reject_reason = Some(reason.to_string());
    decision.rationale = detail.to_string();
    decision
}

fn median3(a: f64, b: f64, c: f64) -> f64 {
    a.max(b).min(a.min(b).max(c))
}

#[allow(clippy::cast_possible_truncation)]
fn round_ms(value: f64) -> i64 {
    value.round() as i64
}
