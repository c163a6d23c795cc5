//! End-to-end driver scenarios over in-memory collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mediabot_downloads::DownloadRouter;
use mediabot_engine::testing::{FakeRunner, InstantClient, MemoryJobStore, UnusedClient};
use mediabot_engine::{EngineSettings, PipelineDriver, StageLimits};
use mediabot_exec::CommandSpec;
use mediabot_model::{
    Job, JobKind, JobPriority, JobState, JobStore, PipelineError, StepStatus, StepType,
    SyncDecisionKind,
};
use mediabot_progress::{MemoryProgressStore, ProgressStore};
use mediabot_sync::DecisionEngine;
use mediabot_upload::{LocalDirTarget, UploadRouter};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const MAGNET: &str = "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD&dn=Foo";

const PROBE_BOTH: &str = r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],"format":{"duration":"100.0"}}"#;
const PROBE_AUDIO_ONLY: &str =
    r#"{"streams":[{"codec_type":"audio"}],"format":{"duration":"100.0"}}"#;
const PROBE_VIDEO_ONLY: &str =
    r#"{"streams":[{"codec_type":"video"}],"format":{"duration":"100.0"}}"#;

fn measurements_json(start: f64, middle: f64, end: f64, drift: f64) -> String {
    format!(
        r#"{{
            "videoDurationSeconds": 100.0,
            "audioDurationSeconds": 100.0,
            "leadingSilenceMs": 500.0,
            "trailingSilenceMs": 0.0,
            "offsets": {{
                "startOffsetMs": {start},
                "middleOffsetMs": {middle},
                "endOffsetMs": {end},
                "driftMsPerSecond": {drift}
            }},
            "methods": [
                {{"method": "cross-correlation", "startOffsetMs": {start}, "confidence": 0.92}},
                {{"method": "fingerprint", "startOffsetMs": {middle}, "confidence": 0.88}}
            ],
            "confidence": 0.9
        }}"#
    )
}

struct Harness {
    store: Arc<MemoryJobStore>,
    progress: Arc<MemoryProgressStore>,
    driver: PipelineDriver,
    _working: TempDir,
    _processed: TempDir,
    _uploads: TempDir,
}

/// Fake-runner behaviour: ffmpeg materialises its output file, ffprobe
/// answers per-path canned JSON, the analyzer prints measurements.
fn handler(
    analyzer_json: String,
    input_probe: &'static str,
    processed_probe: &'static str,
) -> impl Fn(&CommandSpec) -> mediabot_exec::ExecResult<mediabot_exec::CommandOutput> + Send + Sync
{
    move |spec: &CommandSpec| {
        if spec.program.ends_with("ffmpeg") {
            if let Some(output) = spec.args.last() {
                std::fs::write(output, b"rendered-output").expect("write output");
            }
            FakeRunner::ok("")
        } else if spec.program.ends_with("ffprobe") {
            let input = spec.args.last().cloned().unwrap_or_default();
            if input.contains("processed") {
                FakeRunner::ok(processed_probe)
            } else {
                FakeRunner::ok(input_probe)
            }
        } else {
            FakeRunner::ok(&analyzer_json)
        }
    }
}

fn harness(
    filenames: Vec<String>,
    analyzer_json: String,
    input_probe: &'static str,
    processed_probe: &'static str,
) -> Harness {
    let working = TempDir::new().expect("working");
    let processed = TempDir::new().expect("processed");
    let uploads = TempDir::new().expect("uploads");

    let store = Arc::new(MemoryJobStore::new());
    let progress = Arc::new(MemoryProgressStore::new(Duration::from_secs(3600)));
    let router = Arc::new(DownloadRouter::new(
        Arc::new(InstantClient::new("torrent", filenames, 4_096)),
        Arc::new(UnusedClient("direct")),
        Arc::new(UnusedClient("cloud")),
        Arc::new(UnusedClient("usenet")),
        Duration::from_secs(5),
    ));
    let runner = Arc::new(FakeRunner::new(handler(
        analyzer_json,
        input_probe,
        processed_probe,
    )));
    let upload_router = UploadRouter::new(
        Arc::new(LocalDirTarget::new(uploads.path().to_path_buf())),
        None,
    );
    let settings = EngineSettings {
        working_root: working.path().to_path_buf(),
        processed_root: processed.path().to_path_buf(),
        retry_cap: 3,
        step_timeout: Duration::from_secs(30),
        ffprobe_bin: PathBuf::from("ffprobe"),
        ffmpeg_bin: PathBuf::from("ffmpeg"),
        analyzer_bin: PathBuf::from("av-sync-probe"),
    };
    let driver = PipelineDriver::new(
        Arc::clone(&store) as Arc<dyn mediabot_model::JobStore>,
        Arc::clone(&progress) as Arc<dyn ProgressStore>,
        router,
        runner,
        DecisionEngine::default(),
        upload_router,
        Arc::new(StageLimits::default()),
        settings,
    );
    Harness {
        store,
        progress,
        driver,
        _working: working,
        _processed: processed,
        _uploads: uploads,
    }
}

async fn submit(harness: &Harness, kind: JobKind) -> String {
    let job = Job::new("tester", MAGNET, kind, JobPriority::Normal);
    let id = job.id.clone();
    harness.store.create_job(&job).await.expect("create job");
    id
}

#[tokio::test]
async fn full_pipeline_reaches_done_with_delay_correction() {
    let harness = harness(
        vec!["feature.mkv".into()],
        measurements_json(802.0, 804.0, 806.0, 0.05),
        PROBE_BOTH,
        PROBE_BOTH,
    );
    let job_id = submit(&harness, JobKind::FullPipeline).await;

    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Done);

    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.state, JobState::Done);
    assert!(job.terminal_at.is_some());

    let decision = harness
        .store
        .fetch_sync_decision(&job_id)
        .await
        .expect("fetch")
        .expect("decision persisted");
    assert_eq!(decision.decision, SyncDecisionKind::Delay);
    assert_eq!(decision.offset_ms, Some(804));

    let history = harness.store.load_history(&job_id).await.expect("history");
    let states: Vec<JobState> = history.iter().map(|transition| transition.to).collect();
    assert_eq!(
        states,
        vec![
            JobState::Downloading,
            JobState::Analyzing,
            JobState::Syncing,
            JobState::Processing,
            JobState::Validating,
            JobState::Packaged,
            JobState::Uploaded,
            JobState::Done,
        ]
    );

    // Step ordinals are dense 1..=N and every step completed.
    let steps = harness.store.fetch_steps(&job_id).await.expect("steps");
    let ordinals: Vec<u32> = steps.iter().map(|step| step.ordinal).collect();
    assert_eq!(ordinals, (1..=u32::try_from(steps.len()).unwrap()).collect::<Vec<_>>());
    assert!(steps.iter().all(|step| step.status == StepStatus::Completed));

    // The package landed with its manifest, and the upload manifest was
    // recorded against the serving target.
    let manifest_path = harness.store.manifest_path(&job_id).await.expect("manifest");
    assert!(std::path::Path::new(&manifest_path).is_file());
    let uploaded = harness
        .store
        .upload_manifest(&job_id)
        .await
        .expect("upload manifest");
    assert_eq!(uploaded.target, "local-dir");
    assert_eq!(uploaded.package.job_id, job_id);

    // Terminal jobs leave no progress record behind.
    assert!(harness.progress.get(&job_id).await.expect("get").is_none());
}

#[tokio::test]
async fn single_stream_payload_skips_syncing() {
    let harness = harness(
        vec!["track.flac".into()],
        measurements_json(0.0, 0.0, 0.0, 0.0),
        PROBE_AUDIO_ONLY,
        PROBE_AUDIO_ONLY,
    );
    let job_id = submit(&harness, JobKind::FullPipeline).await;

    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Done);

    let history = harness.store.load_history(&job_id).await.expect("history");
    assert!(
        history
            .iter()
            .all(|transition| transition.to != JobState::Syncing)
    );
    let skip = history
        .iter()
        .find(|transition| {
            transition.from == JobState::Analyzing && transition.to == JobState::Processing
        })
        .expect("analyzing skipped to processing");
    assert_eq!(skip.reason.as_deref(), Some("single-stream"));

    // No sync decision is recorded for single-stream payloads.
    assert!(
        harness
            .store
            .fetch_sync_decision(&job_id)
            .await
            .expect("fetch")
            .is_none()
    );
}

#[tokio::test]
async fn mixed_symptoms_measurements_fail_the_job() {
    let harness = harness(
        vec!["feature.mkv".into()],
        measurements_json(100.0, 50.0, -400.0, 5.0),
        PROBE_BOTH,
        PROBE_BOTH,
    );
    let job_id = submit(&harness, JobKind::FullPipeline).await;

    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Failed);

    let decision = harness
        .store
        .fetch_sync_decision(&job_id)
        .await
        .expect("fetch")
        .expect("decision persisted");
    assert_eq!(decision.decision, SyncDecisionKind::Reject);
    assert_eq!(decision.reject_reason.as_deref(), Some("mixed-symptoms"));

    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.is_some());
    assert!(harness.progress.get(&job_id).await.expect("get").is_none());
}

#[tokio::test]
async fn validation_failure_reprocesses_once_then_fails() {
    // The processed output keeps losing its audio stream, so the first
    // validation re-enters PROCESSING and the second one is final.
    let harness = harness(
        vec!["feature.mkv".into()],
        measurements_json(10.0, 12.0, 14.0, 0.0),
        PROBE_BOTH,
        PROBE_VIDEO_ONLY,
    );
    let job_id = submit(&harness, JobKind::FullPipeline).await;

    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Failed);

    let history = harness.store.load_history(&job_id).await.expect("history");
    let revalidations = history
        .iter()
        .filter(|transition| {
            transition.from == JobState::Validating
                && transition.to == JobState::Processing
                && transition.reason.as_deref() == Some("revalidate")
        })
        .count();
    assert_eq!(revalidations, 1);
    assert_eq!(history.last().map(|transition| transition.to), Some(JobState::Failed));

    let steps = harness.store.fetch_steps(&job_id).await.expect("steps");
    let failed_validates = steps
        .iter()
        .filter(|step| step.step_type == StepType::Validate && step.status == StepStatus::Failed)
        .count();
    assert_eq!(failed_validates, 2);
}

#[tokio::test]
async fn cancellation_mid_download_cancels_job_and_clears_progress() {
    let harness = harness(
        vec!["feature.mkv".into()],
        measurements_json(0.0, 0.0, 0.0, 0.0),
        PROBE_BOTH,
        PROBE_BOTH,
    );
    let job_id = submit(&harness, JobKind::FullPipeline).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let state = harness
        .driver
        .run(&job_id, cancel)
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Cancelled);

    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.state, JobState::Cancelled);
    assert!(harness.progress.get(&job_id).await.expect("get").is_none());

    // A subsequent re-entry retries from PENDING and completes, keeping
    // the retry count.
    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("retry runs");
    assert_eq!(state, JobState::Done);
    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.retry_count, 1);
    let history = harness.store.load_history(&job_id).await.expect("history");
    let retry = history
        .iter()
        .find(|transition| {
            transition.from == JobState::Cancelled && transition.to == JobState::Pending
        })
        .expect("retry transition");
    assert_eq!(retry.reason.as_deref(), Some("retry"));
}

#[tokio::test]
async fn retry_cap_is_enforced() {
    let harness = harness(
        vec!["feature.mkv".into()],
        measurements_json(0.0, 0.0, 0.0, 0.0),
        PROBE_BOTH,
        PROBE_BOTH,
    );
    let mut job = Job::new("tester", MAGNET, JobKind::FullPipeline, JobPriority::Normal);
    job.retry_count = 3;
    let job_id = job.id.clone();
    harness.store.create_job(&job).await.expect("create");
    // Materialise a FAILED state with a legal history.
    {
        let store = harness.driver.store();
        let mut machine = mediabot_model::StateMachine::new(job_id.clone());
        let failed = machine
            .transition_to(JobState::Failed, Some("boom".into()), None)
            .expect("legal")
            .clone();
        store
            .append_transition(&job_id, &failed)
            .await
            .expect("append");
        job.state = JobState::Failed;
        store.update_job(&job).await.expect("update");
    }

    let err = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect_err("cap reached");
    assert!(matches!(err, PipelineError::RetryExhausted { attempts: 3 }));
    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.error.as_deref(), Some("retry-exhausted"));
}

#[tokio::test]
async fn unsupported_link_fails_during_download_stage() {
    let harness = harness(
        vec![],
        measurements_json(0.0, 0.0, 0.0, 0.0),
        PROBE_BOTH,
        PROBE_BOTH,
    );
    let job = Job::new(
        "tester",
        "ftp://mirror.test/file.bin",
        JobKind::Download,
        JobPriority::Normal,
    );
    let job_id = job.id.clone();
    harness.store.create_job(&job).await.expect("create");

    let state = harness
        .driver
        .run(&job_id, CancellationToken::new())
        .await
        .expect("driver runs");
    assert_eq!(state, JobState::Failed);
    let job = harness
        .store
        .fetch_job(&job_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(job.error.as_deref(), Some("unsupported link"));
}
