//! qBittorrent Web API v2 adapter.
//!
//! Transfers are tagged with the job id; the tag doubles as the router's
//! handle so magnet and metainfo additions resolve the same way.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_link::ClassifiedLink;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{DownloadClient, TransferContext, TransferState, TransferStatus};
use crate::{DownloadError, DownloadResult};

const NAME: &str = "qbittorrent";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    dlspeed: u64,
    #[serde(default)]
    eta: i64,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    content_path: String,
}

/// Adapter over a qBittorrent Web API endpoint.
pub struct QbittorrentClient {
    http: reqwest::Client,
    base_url: String,
}

impl QbittorrentClient {
    /// Client against the given Web API base URL.
    ///
    /// # Errors
    ///
    /// Returns a client error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn info_by_tag(&self, tag: &str) -> DownloadResult<Option<TorrentInfo>> {
        let url = format!("{}/api/v2/torrents/info", self.base_url);
        let infos: Vec<TorrentInfo> = self
            .http
            .get(&url)
            .query(&[("tag", tag)])
            .send()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?
            .error_for_status()
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?
            .json()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(infos.into_iter().next())
    }
}

#[async_trait]
impl DownloadClient for QbittorrentClient {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    async fn start(
        &self,
        link: &ClassifiedLink,
        context: &TransferContext,
        _cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        let url = format!("{}/api/v2/torrents/add", self.base_url);
        let form = [
            ("urls", link.original.clone()),
            ("savepath", context.output_dir.to_string_lossy().into_owned()),
            ("tags", context.job_id.clone()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::client(
                NAME,
                format!("add rejected with status {}", response.status()),
            ));
        }
        debug!(job_id = %context.job_id, "torrent admitted");
        Ok(context.job_id.clone())
    }

    async fn poll(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        let Some(info) = self.info_by_tag(handle).await? else {
            // The torrent may not be visible immediately after addition.
            return Ok(TransferStatus {
                state: TransferState::Queued,
                progress: 0.0,
                speed_bps: 0,
                eta_seconds: None,
                total_bytes: 0,
            });
        };

        let state = match info.state.as_str() {
            "error" | "missingFiles" => {
                TransferState::Failed(format!("torrent entered state {}", info.state))
            }
            "uploading" | "stalledUP" | "queuedUP" | "pausedUP" | "forcedUP" => {
                TransferState::Completed
            }
            _ if info.progress >= 1.0 => TransferState::Completed,
            "queuedDL" | "checkingDL" | "metaDL" => TransferState::Queued,
            _ => TransferState::Active,
        };
        Ok(TransferStatus {
            state,
            progress: (info.progress * 100.0).clamp(0.0, 100.0),
            speed_bps: info.dlspeed,
            eta_seconds: u64::try_from(info.eta).ok().filter(|eta| *eta < 8_640_000),
            total_bytes: info.size,
        })
    }

    async fn cancel(&self, handle: &str) -> DownloadResult<()> {
        let Some(info) = self.info_by_tag(handle).await? else {
            return Ok(());
        };
        let url = format!("{}/api/v2/torrents/delete", self.base_url);
        self.http
            .post(&url)
            .form(&[("hashes", info.hash.as_str()), ("deleteFiles", "true")])
            .send()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(())
    }

    async fn files(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        let info = self
            .info_by_tag(handle)
            .await?
            .ok_or_else(|| DownloadError::client(NAME, "completed torrent disappeared"))?;
        if info.content_path.is_empty() {
            return Err(DownloadError::client(NAME, "torrent has no content path"));
        }
        Ok(vec![PathBuf::from(info.content_path)])
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/v2/app/version", self.base_url);
        matches!(
            self.http.get(&url).send().await,
            Ok(response) if response.status().is_success()
        )
    }
}
