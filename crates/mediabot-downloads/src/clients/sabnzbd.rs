//! SABnzbd REST adapter for NZB transfers.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_link::ClassifiedLink;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client::{DownloadClient, TransferContext, TransferState, TransferStatus};
use crate::{DownloadError, DownloadResult};

const NAME: &str = "sabnzbd";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const CATEGORY: &str = "mediabot";

#[derive(Debug, Deserialize)]
struct AddUrlResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    nzo_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: Queue,
}

#[derive(Debug, Deserialize)]
struct Queue {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    #[serde(default)]
    percentage: String,
    #[serde(default)]
    mb: String,
    #[serde(default)]
    mbleft: String,
    #[serde(default)]
    timeleft: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: History,
}

#[derive(Debug, Deserialize)]
struct History {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    storage: String,
    #[serde(default)]
    fail_message: String,
    #[serde(default)]
    bytes: u64,
}

/// Adapter over a SABnzbd instance.
pub struct SabnzbdClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    complete_dir: PathBuf,
}

impl SabnzbdClient {
    /// Client against the given SABnzbd base URL.
    ///
    /// # Errors
    ///
    /// Returns a client error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        complete_dir: PathBuf,
    ) -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            complete_dir,
        })
    }

    async fn api<T: DeserializeOwned>(&self, query: &[(&str, &str)]) -> DownloadResult<T> {
        let url = format!("{}/api", self.base_url);
        let mut request = self.http.get(&url).query(query).query(&[("output", "json")]);
        if let Some(api_key) = &self.api_key {
            request = request.query(&[("apikey", api_key.as_str())]);
        }
        request
            .send()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?
            .error_for_status()
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?
            .json()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn parse_mb(raw: &str) -> u64 {
        raw.parse::<f64>()
            .map(|mb| (mb * 1_048_576.0) as u64)
            .unwrap_or_default()
    }

    fn parse_timeleft(raw: &str) -> Option<u64> {
        let mut seconds = 0u64;
        for part in raw.split(':') {
            seconds = seconds * 60 + part.parse::<u64>().ok()?;
        }
        (seconds > 0).then_some(seconds)
    }
}

#[async_trait]
impl DownloadClient for SabnzbdClient {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    async fn start(
        &self,
        link: &ClassifiedLink,
        _context: &TransferContext,
        _cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        let response: AddUrlResponse = self
            .api(&[
                ("mode", "addurl"),
                ("name", link.original.as_str()),
                ("cat", CATEGORY),
            ])
            .await?;
        if !response.status {
            return Err(DownloadError::client(NAME, "addurl rejected"));
        }
        response
            .nzo_ids
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::client(NAME, "addurl returned no nzo id"))
    }

    async fn poll(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        let queue: QueueResponse = self.api(&[("mode", "queue")]).await?;
        if let Some(slot) = queue.queue.slots.iter().find(|slot| slot.nzo_id == handle) {
            let total = Self::parse_mb(&slot.mb);
            let left = Self::parse_mb(&slot.mbleft);
            let state = match slot.status.as_str() {
                "Paused" | "Queued" => TransferState::Queued,
                _ => TransferState::Active,
            };
            return Ok(TransferStatus {
                state,
                progress: slot.percentage.parse().unwrap_or(0.0),
                speed_bps: 0,
                eta_seconds: Self::parse_timeleft(&slot.timeleft),
                total_bytes: total.max(left),
            });
        }

        let history: HistoryResponse = self.api(&[("mode", "history")]).await?;
        let Some(slot) = history
            .history
            .slots
            .iter()
            .find(|slot| slot.nzo_id == handle)
        else {
            return Ok(TransferStatus {
                state: TransferState::Queued,
                progress: 0.0,
                speed_bps: 0,
                eta_seconds: None,
                total_bytes: 0,
            });
        };
        match slot.status.as_str() {
            "Completed" => Ok(TransferStatus::completed(slot.bytes)),
            "Failed" => Ok(TransferStatus {
                state: TransferState::Failed(if slot.fail_message.is_empty() {
                    "unpack failed".to_string()
                } else {
                    slot.fail_message.clone()
                }),
                progress: 0.0,
                speed_bps: 0,
                eta_seconds: None,
                total_bytes: slot.bytes,
            }),
            _ => Ok(TransferStatus {
                state: TransferState::Active,
                progress: 99.0,
                speed_bps: 0,
                eta_seconds: None,
                total_bytes: slot.bytes,
            }),
        }
    }

    async fn cancel(&self, handle: &str) -> DownloadResult<()> {
        let _: serde_json::Value = self
            .api(&[
                ("mode", "queue"),
                ("name", "delete"),
                ("value", handle),
                ("del_files", "1"),
            ])
            .await?;
        Ok(())
    }

    async fn files(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        let history: HistoryResponse = self.api(&[("mode", "history")]).await?;
        let storage = history
            .history
            .slots
            .iter()
            .find(|slot| slot.nzo_id == handle)
            .map(|slot| slot.storage.clone())
            .filter(|storage| !storage.is_empty());
        match storage {
            Some(storage) => Ok(vec![PathBuf::from(storage)]),
            // Fall back to the engine category directory.
            None => Ok(vec![self.complete_dir.clone()]),
        }
    }

    async fn health_check(&self) -> bool {
        self.api::<serde_json::Value>(&[("mode", "version")])
            .await
            .is_ok()
    }
}
