//! aria2 JSON-RPC adapter for direct HTTP(S) downloads.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_link::ClassifiedLink;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{DownloadClient, TransferContext, TransferState, TransferStatus};
use crate::{DownloadError, DownloadResult};

const NAME: &str = "aria2";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    status: String,
    #[serde(default, rename = "completedLength")]
    completed_length: String,
    #[serde(default, rename = "totalLength")]
    total_length: String,
    #[serde(default, rename = "downloadSpeed")]
    download_speed: String,
    #[serde(default, rename = "errorMessage")]
    error_message: String,
    #[serde(default)]
    files: Vec<StatusFile>,
}

#[derive(Debug, Deserialize)]
struct StatusFile {
    path: String,
}

/// Adapter over an aria2 JSON-RPC endpoint.
pub struct Aria2Client {
    http: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl Aria2Client {
    /// Client against the given RPC endpoint, optionally authenticated.
    ///
    /// # Errors
    ///
    /// Returns a client error if the HTTP client cannot be constructed.
    pub fn new(endpoint: &str, secret: Option<String>) -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            secret,
        })
    }

    async fn call(&self, method: &str, mut params: Vec<Value>) -> DownloadResult<Value> {
        if let Some(secret) = &self.secret {
            params.insert(0, json!(format!("token:{secret}")));
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": "mediabot",
            "method": method,
            "params": params,
        });
        let envelope: RpcEnvelope = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?
            .json()
            .await
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(DownloadError::client(
                NAME,
                format!("rpc error {}: {}", error.code, error.message),
            ));
        }
        envelope
            .result
            .ok_or_else(|| DownloadError::client(NAME, "rpc response carried no result"))
    }

    fn parse_u64(raw: &str) -> u64 {
        raw.parse().unwrap_or_default()
    }
}

#[async_trait]
impl DownloadClient for Aria2Client {
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
        let options = json!({ "dir": context.output_dir.to_string_lossy() });
        let result = self
            .call(
                "aria2.addUri",
                vec![json!([link.original]), options],
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DownloadError::client(NAME, "addUri returned no gid"))
    }

    async fn poll(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![
                    json!(handle),
                    json!([
                        "status",
                        "completedLength",
                        "totalLength",
                        "downloadSpeed",
                        "errorMessage",
                        "files"
                    ]),
                ],
            )
            .await?;
        let status: Status = serde_json::from_value(result)
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;

        let completed = Self::parse_u64(&status.completed_length);
        let total = Self::parse_u64(&status.total_length);
        let speed = Self::parse_u64(&status.download_speed);
        #[allow(clippy::cast_precision_loss)]
        let progress = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let state = match status.status.as_str() {
            "complete" => TransferState::Completed,
            "error" => TransferState::Failed(if status.error_message.is_empty() {
                "download failed".to_string()
            } else {
                status.error_message
            }),
            "waiting" | "paused" => TransferState::Queued,
            _ => TransferState::Active,
        };

        let remaining = total.saturating_sub(completed);
        Ok(TransferStatus {
            state,
            progress,
            speed_bps: speed,
            eta_seconds: (speed > 0).then(|| remaining / speed),
            total_bytes: total,
        })
    }

    async fn cancel(&self, handle: &str) -> DownloadResult<()> {
        self.call("aria2.remove", vec![json!(handle)]).await?;
        // Drop the result entry as well so retries start clean.
        let _ = self
            .call("aria2.removeDownloadResult", vec![json!(handle)])
            .await;
        Ok(())
    }

    async fn files(
        &self,
        handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![json!(handle), json!(["files", "status"])],
            )
            .await?;
        let status: Status = serde_json::from_value(result)
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        Ok(status
            .files
            .into_iter()
            .map(|file| PathBuf::from(file.path))
            .collect())
    }

    async fn health_check(&self) -> bool {
        self.call("aria2.getVersion", vec![]).await.is_ok()
    }
}
