#![forbid(unsafe_code)]

//! HTTP facade for the job pipeline engine.
//!
//! Thin by design: handlers validate input, talk to the job store and the
//! job runner, and translate domain failures into the API error envelope.
//! All pipeline semantics live in the engine.

pub mod error;
pub mod models;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use mediabot_engine::JobRunner;
use mediabot_link::classify;
use mediabot_model::{Job, JobKind, JobPriority, JobState, JobStore};
use mediabot_progress::ProgressStore;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use error::ApiError;
use models::{
    JobDetailResponse, JobEnvelope, JobSummary, LogsQuery, LogsResponse, SubmitJobRequest,
};

/// Owner recorded on jobs submitted through the HTTP surface.
const API_OWNER: &str = "api";
/// Default page size of the logs endpoint.
const DEFAULT_LOG_LIMIT: i64 = 100;

/// Shared handler state.
pub struct ApiState {
    store: Arc<dyn JobStore>,
    progress: Arc<dyn ProgressStore>,
    runner: Arc<JobRunner>,
}

impl ApiState {
    /// State over the engine's collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        progress: Arc<dyn ProgressStore>,
        runner: Arc<JobRunner>,
    ) -> Self {
        Self {
            store,
            progress,
            runner,
        }
    }
}

/// The mediabot API server.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over shared state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let router = Router::new()
            .route("/", get(root))
            .route("/ready", get(ready))
            .route("/live", get(live))
            .route("/api/v1/jobs", post(submit_job))
            .route("/api/v1/jobs/{id}", get(job_detail))
            .route("/api/v1/jobs/{id}/retry", post(retry_job))
            .route("/api/v1/jobs/{id}/cancel", post(cancel_job))
            .route("/api/v1/jobs/{id}/logs", get(job_logs))
            .layer(TraceLayer::new_for_http())
            .with_state(state);
        Self { router }
    }

    /// Serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns the bind or serve error.
    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        info!(%addr, "starting API");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router.into_make_service()).await
    }

    /// The underlying router (used by tests).
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn root() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

async fn ready(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let database = state.store.ping().await;
    let progress = state.progress.ping().await;
    let (status, label) = match (database, progress) {
        (true, true) => (StatusCode::OK, "healthy"),
        (true, false) | (false, true) => (StatusCode::OK, "degraded"),
        (false, false) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    (
        status,
        Json(json!({
            "status": label,
            "checks": { "database": database, "progressStore": progress },
        })),
    )
}

async fn submit_job(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<JobEnvelope>), ApiError> {
    let kind = JobKind::parse(&request.kind)
        .ok_or_else(|| ApiError::bad_request(format!("unknown job type `{}`", request.kind)))?;
    if classify(&request.source).is_none() {
        return Err(ApiError::bad_request("unrecognised source link"));
    }
    let priority = request
        .options
        .priority
        .map_or(JobPriority::Normal, JobPriority::from_level);

    let job = Job::new(API_OWNER, &request.source, kind, priority);
    state.store.create_job(&job).await.map_err(|err| {
        tracing::error!(error = %err, "failed to persist submitted job");
        ApiError::internal("failed to persist job")
    })?;
    state.runner.submit(&job.id).await;

    Ok((
        StatusCode::CREATED,
        Json(JobEnvelope {
            job: JobSummary::from(&job),
        }),
    ))
}

async fn job_detail(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    let job = fetch_job(&state, &id).await?;
    let downloads = state
        .store
        .fetch_downloads(&id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let steps = state
        .store
        .fetch_steps(&id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let sync_decision = state
        .store
        .fetch_sync_decision(&id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(JobDetailResponse {
        job,
        downloads,
        steps,
        sync_decision,
    }))
}

async fn retry_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobEnvelope>), ApiError> {
    let job = fetch_job(&state, &id).await?;
    if !matches!(job.state, JobState::Failed | JobState::Cancelled) {
        return Err(ApiError::conflict(format!(
            "job is {}; only FAILED or CANCELLED jobs can be retried",
            job.state.as_str()
        )));
    }
    if !state.runner.submit(&id).await {
        return Err(ApiError::conflict("job is already being driven"));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(JobEnvelope {
            job: JobSummary::from(&job),
        }),
    ))
}

async fn cancel_job(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Ensure the job exists so unknown ids are 404, not 409.
    let _job = fetch_job(&state, &id).await?;
    if state.runner.cancel(&id).await {
        Ok(Json(json!({ "cancelled": true })))
    } else {
        Err(ApiError::conflict("job has no active driver"))
    }
}

async fn job_logs(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let _job = fetch_job(&state, &id).await?;
    let entries = state
        .store
        .fetch_audit(&id, query.after, query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(LogsResponse { entries }))
}

async fn fetch_job(state: &ApiState, id: &str) -> Result<Job, ApiError> {
    state
        .store
        .fetch_job(id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("job {id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediabot_downloads::DownloadRouter;
    use mediabot_engine::testing::{FakeRunner, MemoryJobStore, UnusedClient};
    use mediabot_engine::{EngineSettings, PipelineDriver, StageLimits};
    use mediabot_model::JobPriority;
    use mediabot_progress::MemoryProgressStore;
    use mediabot_sync::DecisionEngine;
    use mediabot_upload::{LocalDirTarget, UploadRouter};
    use std::path::PathBuf;
    use std::time::Duration;

    fn state() -> (Arc<MemoryJobStore>, Arc<ApiState>) {
        let store = Arc::new(MemoryJobStore::new());
        let progress = Arc::new(MemoryProgressStore::new(Duration::from_secs(60)));
        let router = Arc::new(DownloadRouter::new(
            Arc::new(UnusedClient("torrent")),
            Arc::new(UnusedClient("direct")),
            Arc::new(UnusedClient("cloud")),
            Arc::new(UnusedClient("usenet")),
            Duration::from_secs(5),
        ));
        let driver = Arc::new(PipelineDriver::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&progress) as Arc<dyn ProgressStore>,
            router,
            Arc::new(FakeRunner::new(|_spec| FakeRunner::ok("{}"))),
            DecisionEngine::default(),
            UploadRouter::new(Arc::new(LocalDirTarget::new(PathBuf::from("/tmp"))), None),
            Arc::new(StageLimits::default()),
            EngineSettings {
                working_root: PathBuf::from("/tmp/work"),
                processed_root: PathBuf::from("/tmp/processed"),
                retry_cap: 3,
                step_timeout: Duration::from_secs(5),
                ffprobe_bin: PathBuf::from("ffprobe"),
                ffmpeg_bin: PathBuf::from("ffmpeg"),
                analyzer_bin: PathBuf::from("av-sync-probe"),
            },
        ));
        let runner = Arc::new(JobRunner::new(driver));
        let api_state = Arc::new(ApiState::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            progress,
            runner,
        ));
        (store, api_state)
    }

    #[tokio::test]
    async fn submit_rejects_unknown_type_and_link() {
        let (_store, state) = state();
        let err = submit_job(
            State(Arc::clone(&state)),
            Json(SubmitJobRequest {
                kind: "transcode".into(),
                source: "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD".into(),
                options: models::SubmitJobOptions::default(),
            }),
        )
        .await
        .expect_err("unknown type");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = submit_job(
            State(state),
            Json(SubmitJobRequest {
                kind: "download".into(),
                source: "definitely not a link".into(),
                options: models::SubmitJobOptions::default(),
            }),
        )
        .await
        .expect_err("bad link");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_creates_a_pending_job() {
        let (store, state) = state();
        let (status, Json(envelope)) = submit_job(
            State(state),
            Json(SubmitJobRequest {
                kind: "full-pipeline".into(),
                source: "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD&dn=Foo"
                    .into(),
                options: models::SubmitJobOptions {
                    priority: Some(2),
                    ..models::SubmitJobOptions::default()
                },
            }),
        )
        .await
        .expect("submits");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(envelope.job.status, "PENDING");

        let job = store
            .fetch_job(&envelope.job.id)
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.owner, API_OWNER);
    }

    #[tokio::test]
    async fn job_detail_is_404_for_unknown_ids() {
        let (_store, state) = state();
        let err = job_detail(State(state), Path("missing".into()))
            .await
            .expect_err("missing");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_requires_a_retryable_state() {
        let (store, state) = state();
        let job = Job::new(
            "tester",
            "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD",
            JobKind::Download,
            JobPriority::Normal,
        );
        let id = job.id.clone();
        store.create_job(&job).await.expect("create");

        let err = retry_job(State(state), Path(id)).await.expect_err("pending");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn readiness_reports_healthy_with_both_stores() {
        let (_store, state) = state();
        let response = ready(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
