//! Application wiring: configuration, stores, clients, engine, API.

use std::net::SocketAddr;
use std::sync::Arc;

use mediabot_api::{ApiServer, ApiState};
use mediabot_config::Settings;
use mediabot_data::PgJobStore;
use mediabot_downloads::{
    Aria2Client, DownloadRouter, QbittorrentClient, RcloneClient, SabnzbdClient,
};
use mediabot_engine::{EngineSettings, JobRunner, PipelineDriver, StageLimits};
use mediabot_exec::{CommandRunner, ProcessRunner};
use mediabot_model::JobStore;
use mediabot_progress::{MemoryProgressStore, ProgressStore, RedisProgressStore};
use mediabot_sync::{DecisionEngine, SyncThresholds};
use mediabot_upload::{RcloneTarget, UploadRouter, UploadTarget};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::telemetry;

/// Boot the application and serve until shutdown.
///
/// # Errors
///
/// Returns configuration errors (exit code 2 at the binary boundary) and
/// any wiring or serve failure.
pub(crate) async fn run() -> AppResult<()> {
    telemetry::init_logging()?;
    let settings = Settings::from_env()?;
    info!("mediabot bootstrap starting");

    let store = PgJobStore::connect(&settings.database.url, settings.database.max_connections)
        .await
        .map_err(|source| AppError::Store { source })?;
    let store: Arc<dyn JobStore> = Arc::new(store);
    info!("durable store ready");

    let progress: Arc<dyn ProgressStore> = match &settings.progress.redis_url {
        Some(url) => Arc::new(
            RedisProgressStore::connect(url, settings.progress.ttl)
                .await
                .map_err(|source| AppError::Progress { source })?,
        ),
        None => Arc::new(MemoryProgressStore::new(settings.progress.ttl)),
    };

    let exec: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let router = Arc::new(build_router(&settings, &exec)?);
    let uploads = build_uploads(&settings, &exec);

    let limits = Arc::new(StageLimits::new(
        settings.pipeline.download_slots,
        settings.pipeline.process_slots,
        settings.pipeline.upload_slots,
    ));
    let engine_settings = EngineSettings {
        working_root: settings.storage.working.clone(),
        processed_root: settings.storage.processed.clone(),
        retry_cap: settings.pipeline.retry_cap,
        step_timeout: settings.pipeline.step_timeout,
        ffprobe_bin: settings.tools.ffprobe_bin.clone(),
        ffmpeg_bin: settings.tools.ffmpeg_bin.clone(),
        analyzer_bin: settings.tools.analyzer_bin.clone(),
    };
    let driver = Arc::new(PipelineDriver::new(
        Arc::clone(&store),
        Arc::clone(&progress),
        router,
        exec,
        DecisionEngine::new(SyncThresholds::default()),
        uploads,
        limits,
        engine_settings,
    ));
    let runner = Arc::new(JobRunner::new(driver));

    let state = Arc::new(ApiState::new(store, progress, runner));
    let addr = parse_bind_addr(&settings.api.bind_addr)?;
    let server = ApiServer::new(state);

    tokio::select! {
        served = server.serve(addr) => served.map_err(|source| AppError::Serve { source }),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|source| AppError::Serve { source })?;
            info!("shutdown signal received");
            Ok(())
        }
    }
}

fn build_router(
    settings: &Settings,
    exec: &Arc<dyn CommandRunner>,
) -> AppResult<DownloadRouter> {
    let clients = &settings.clients;
    let torrent = QbittorrentClient::new(&clients.qbittorrent_url)
        .map_err(|source| AppError::Clients { source })?;
    let direct = Aria2Client::new(&clients.aria2_url, clients.aria2_secret.clone())
        .map_err(|source| AppError::Clients { source })?;
    let cloud = RcloneClient::new(
        Arc::clone(exec),
        clients.rclone_bin.clone(),
        clients.rclone_config.clone(),
        clients.rclone_remote.clone(),
        settings.pipeline.cloud_copy_timeout,
    );
    let usenet = SabnzbdClient::new(
        &clients.sabnzbd_url,
        clients.sabnzbd_api_key.clone(),
        clients.sabnzbd_complete_dir.clone(),
    )
    .map_err(|source| AppError::Clients { source })?;
    Ok(DownloadRouter::new(
        Arc::new(torrent),
        Arc::new(direct),
        Arc::new(cloud),
        Arc::new(usenet),
        settings.pipeline.health_probe_timeout,
    ))
}

fn build_uploads(settings: &Settings, exec: &Arc<dyn CommandRunner>) -> UploadRouter {
    let target = |remote: &str| -> Arc<dyn UploadTarget> {
        Arc::new(RcloneTarget::new(
            Arc::clone(exec),
            settings.clients.rclone_bin.clone(),
            settings.clients.rclone_config.clone(),
            remote.to_string(),
            settings.pipeline.cloud_copy_timeout,
        ))
    };
    UploadRouter::new(
        target(&settings.upload.primary_remote),
        settings
            .upload
            .secondary_remote
            .as_deref()
            .map(target),
    )
}

/// Accept `host:port`, optionally wrapped in an `http(s)://` URL.
fn parse_bind_addr(raw: &str) -> AppResult<SocketAddr> {
    let trimmed = raw
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let trimmed = trimmed.split('/').next().unwrap_or(trimmed);
    trimmed.parse().map_err(|_| AppError::BindAddr {
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_accepts_plain_and_url_forms() {
        assert_eq!(
            parse_bind_addr("0.0.0.0:8080").expect("plain"),
            "0.0.0.0:8080".parse::<SocketAddr>().expect("addr")
        );
        assert_eq!(
            parse_bind_addr("http://127.0.0.1:9090/").expect("url"),
            "127.0.0.1:9090".parse::<SocketAddr>().expect("addr")
        );
        assert!(parse_bind_addr("not an address").is_err());
    }
}
