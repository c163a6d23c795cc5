//! Command planning for processing steps.
//!
//! Each planner returns a `CommandSpec` the driver records on the step row
//! and hands to the command runner. Corrections map onto ffmpeg as: delay
//! shifts the audio input with `-itsoffset`, trim drops leading audio with
//! `-ss`, pad prepends silence with `adelay`, stretch retimes with
//! `atempo` of the reciprocal ratio. Without a correction the mux is a
//! plain stream copy.

use std::path::Path;

use mediabot_exec::CommandSpec;
use mediabot_model::{SyncDecision, SyncDecisionKind};

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// ffprobe invocation for a container report.
#[must_use]
pub fn probe_spec(ffprobe: &Path, input: &Path) -> CommandSpec {
    CommandSpec::new(
        path_arg(ffprobe),
        vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path_arg(input),
        ],
    )
}

/// Analyzer invocation producing the measurement JSON on stdout.
#[must_use]
pub fn analyze_spec(analyzer: &Path, video: &Path, audio: &Path) -> CommandSpec {
    CommandSpec::new(
        path_arg(analyzer),
        vec![
            "--video".into(),
            path_arg(video),
            "--audio".into(),
            path_arg(audio),
            "--json".into(),
        ],
    )
}

/// Corrective (or copy) mux producing `output`.
///
/// `audio` defaults to the video container when the payload carries its
/// audio internally.
#[must_use]
pub fn mux_spec(
    ffmpeg: &Path,
    decision: Option<&SyncDecision>,
    video: &Path,
    audio: Option<&Path>,
    output: &Path,
) -> CommandSpec {
    let audio = audio.unwrap_or(video);
    let mut args = vec!["-y".into(), "-i".into(), path_arg(video)];

    let correction = decision.map(|decision| (decision.decision, decision));
    match correction {
        Some((SyncDecisionKind::Delay, decision)) => {
            let seconds = offset_seconds(decision);
            args.extend(["-itsoffset".into(), seconds, "-i".into(), path_arg(audio)]);
            args.extend(map_copy());
        }
        Some((SyncDecisionKind::Trim, decision)) => {
            let seconds = offset_seconds(decision);
            args.extend(["-ss".into(), seconds, "-i".into(), path_arg(audio)]);
            args.extend(map_copy());
        }
        Some((SyncDecisionKind::Pad, decision)) => {
            let millis = decision.offset_ms.unwrap_or(0).unsigned_abs();
            args.extend(["-i".into(), path_arg(audio)]);
            args.extend(map_streams());
            args.extend([
                "-filter:a".into(),
                format!("adelay={millis}:all=1"),
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
        Some((SyncDecisionKind::Stretch, decision)) => {
            let ratio = decision.stretch_ratio.unwrap_or(1.0);
            let tempo = if ratio.abs() > f64::EPSILON { 1.0 / ratio } else { 1.0 };
            args.extend(["-i".into(), path_arg(audio)]);
            args.extend(map_streams());
            args.extend([
                "-filter:a".into(),
                format!("atempo={tempo:.6}"),
                "-c:v".into(),
                "copy".into(),
                "-c:a".into(),
                "aac".into(),
            ]);
        }
        _ => {
            args.extend(["-i".into(), path_arg(audio)]);
            args.extend(map_copy());
        }
    }

    args.push(path_arg(output));
    CommandSpec::new(path_arg(ffmpeg), args)
}

/// Plain stream-copy remux for single-stream payloads.
#[must_use]
pub fn remux_spec(ffmpeg: &Path, input: &Path, output: &Path) -> CommandSpec {
    CommandSpec::new(
        path_arg(ffmpeg),
        vec![
            "-y".into(),
            "-i".into(),
            path_arg(input),
            "-c".into(),
            "copy".into(),
            path_arg(output),
        ],
    )
}

/// 30-second sample cut of the processed output.
///
/// The cut starts at `min(60s, duration / 3)` so short payloads still
/// yield a sample.
#[must_use]
pub fn sample_spec(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    duration_seconds: Option<f64>,
) -> CommandSpec {
    let start = duration_seconds
        .map_or(60.0, |duration| (duration / 3.0).min(60.0))
        .max(0.0);
    CommandSpec::new(
        path_arg(ffmpeg),
        vec![
            "-y".into(),
            "-ss".into(),
            format!("{start:.2}"),
            "-i".into(),
            path_arg(input),
            "-t".into(),
            "30".into(),
            "-c".into(),
            "copy".into(),
            path_arg(output),
        ],
    )
}

fn offset_seconds(decision: &SyncDecision) -> String {
    let millis = decision.offset_ms.unwrap_or(0).unsigned_abs();
    #[allow(clippy::cast_precision_loss)]
    let seconds = millis as f64 / 1000.0;
    format!("{seconds:.3}")
}

fn map_streams() -> [String; 4] {
    ["-map".into(), "0:v:0".into(), "-map".into(), "1:a:0".into()]
}

fn map_copy() -> [String; 6] {
    [
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-c".into(),
        "copy".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabot_model::OffsetMeasurements;
    use std::path::PathBuf;

    fn decision(kind: SyncDecisionKind, offset_ms: Option<i64>, ratio: Option<f64>) -> SyncDecision {
        let mut decision = SyncDecision::for_job("job-1");
        decision.decision = kind;
        decision.offset_ms = offset_ms;
        decision.stretch_ratio = ratio;
        decision.measurements = OffsetMeasurements::default();
        decision
    }

    #[test]
    fn delay_shifts_the_audio_input() {
        let spec = mux_spec(
            Path::new("ffmpeg"),
            Some(&decision(SyncDecisionKind::Delay, Some(804), None)),
            Path::new("/in/a.mkv"),
            None,
            Path::new("/out/processed.mkv"),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("-itsoffset 0.804"));
        assert!(joined.contains("-c copy"));
        assert!(joined.ends_with("/out/processed.mkv"));
    }

    #[test]
    fn trim_seeks_into_the_audio() {
        let spec = mux_spec(
            Path::new("ffmpeg"),
            Some(&decision(SyncDecisionKind::Trim, Some(205), None)),
            Path::new("/in/a.mkv"),
            Some(Path::new("/in/audio.flac")),
            Path::new("/out/processed.mkv"),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("-ss 0.205 -i /in/audio.flac"));
    }

    #[test]
    fn pad_uses_adelay_and_recodes_audio() {
        let spec = mux_spec(
            Path::new("ffmpeg"),
            Some(&decision(SyncDecisionKind::Pad, Some(705), None)),
            Path::new("/in/a.mkv"),
            None,
            Path::new("/out/processed.mkv"),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("adelay=705:all=1"));
        assert!(joined.contains("-c:a aac"));
    }

    #[test]
    fn stretch_uses_reciprocal_tempo() {
        let spec = mux_spec(
            Path::new("ffmpeg"),
            Some(&decision(SyncDecisionKind::Stretch, None, Some(0.997))),
            Path::new("/in/a.mkv"),
            None,
            Path::new("/out/processed.mkv"),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("atempo=1.003009"));
    }

    #[test]
    fn no_decision_is_a_stream_copy() {
        let spec = mux_spec(
            Path::new("ffmpeg"),
            None,
            Path::new("/in/a.mkv"),
            None,
            Path::new("/out/processed.mkv"),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("-c copy"));
        assert!(!joined.contains("filter"));
    }

    #[test]
    fn sample_cut_starts_inside_short_payloads() {
        let spec = sample_spec(
            Path::new("ffmpeg"),
            Path::new("/out/processed.mkv"),
            &PathBuf::from("/out/sample.mkv"),
            Some(90.0),
        );
        let joined = spec.args.join(" ");
        assert!(joined.contains("-ss 30.00"));
        assert!(joined.contains("-t 30"));
    }
}
