//! Parsers for the external probe and measurement tools.

use mediabot_model::{PipelineError, PipelineResult, SyncMeasurements};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Stream layout of a probed container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaProbe {
    /// Whether at least one video stream is present.
    pub has_video: bool,
    /// Whether at least one audio stream is present.
    pub has_audio: bool,
    /// Container duration in seconds, when the format reports one.
    pub duration_seconds: Option<f64>,
}

/// Parse ffprobe's JSON report.
///
/// # Errors
///
/// Returns `Validation` when the output is not the expected JSON shape.
pub fn parse_probe(stdout: &str) -> PipelineResult<MediaProbe> {
    let output: FfprobeOutput =
        serde_json::from_str(stdout).map_err(|err| PipelineError::Validation {
            field: "probe",
            reason: format!("unparseable ffprobe output: {err}"),
        })?;
    let has = |kind: &str| {
        output
            .streams
            .iter()
            .any(|stream| stream.codec_type.as_deref() == Some(kind))
    };
    Ok(MediaProbe {
        has_video: has("video"),
        has_audio: has("audio"),
        duration_seconds: output
            .format
            .and_then(|format| format.duration)
            .and_then(|duration| duration.parse().ok()),
    })
}

/// Parse the sync analyzer's measurement JSON.
///
/// # Errors
///
/// Returns `Validation` when the output is not a measurement document.
pub fn parse_measurements(stdout: &str) -> PipelineResult<SyncMeasurements> {
    serde_json::from_str(stdout).map_err(|err| PipelineError::Validation {
        field: "measurements",
        reason: format!("unparseable analyzer output: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_parses_streams_and_duration() {
        let probe = parse_probe(
            r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],
                "format":{"duration":"3600.25"}}"#,
        )
        .expect("parses");
        assert!(probe.has_video);
        assert!(probe.has_audio);
        assert_eq!(probe.duration_seconds, Some(3600.25));
    }

    #[test]
    fn probe_detects_single_stream_payloads() {
        let probe = parse_probe(r#"{"streams":[{"codec_type":"audio"}]}"#).expect("parses");
        assert!(!probe.has_video);
        assert!(probe.has_audio);
        assert_eq!(probe.duration_seconds, None);
    }

    #[test]
    fn garbage_probe_output_is_a_validation_error() {
        let err = parse_probe("ffprobe: command not found").expect_err("must fail");
        assert!(matches!(err, PipelineError::Validation { field: "probe", .. }));
    }

    #[test]
    fn measurements_parse_camel_case() {
        let measurements = parse_measurements(
            r#"{
                "videoDurationSeconds": 3600.0,
                "audioDurationSeconds": 3600.0,
                "leadingSilenceMs": 120.0,
                "trailingSilenceMs": 40.0,
                "offsets": {
                    "startOffsetMs": 802.0,
                    "middleOffsetMs": 804.0,
                    "endOffsetMs": 806.0,
                    "driftMsPerSecond": 0.05
                },
                "methods": [
                    {"method": "cross-correlation", "startOffsetMs": 800.0, "confidence": 0.92},
                    {"method": "fingerprint", "startOffsetMs": 805.0, "confidence": 0.88}
                ],
                "confidence": 0.9
            }"#,
        )
        .expect("parses");
        assert_eq!(measurements.offsets.middle_offset_ms, 804.0);
        assert_eq!(measurements.methods.len(), 2);
    }
}
