//! Client seam the router supervises transfers through.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_link::ClassifiedLink;
use mediabot_model::JobPriority;
use tokio_util::sync::CancellationToken;

use crate::DownloadResult;

/// Per-transfer inputs handed to a client alongside the link.
#[derive(Debug, Clone)]
pub struct TransferContext {
    /// Correlation tag; clients label their transfer with it.
    pub job_id: String,
    /// Directory the payload must land in.
    pub output_dir: PathBuf,
    /// Scheduling weight, where the client supports one.
    pub priority: JobPriority,
}

/// Transfer lifecycle as observed through polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// Accepted, not yet moving bytes.
    Queued,
    /// Actively transferring.
    Active,
    /// Finished; output files can be enumerated.
    Completed,
    /// Failed with the client's diagnostic, verbatim.
    Failed(String),
}

/// One poll's view of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatus {
    /// Lifecycle state.
    pub state: TransferState,
    /// Progress, 0..=100.
    pub progress: f64,
    /// Transfer rate in bytes per second.
    pub speed_bps: u64,
    /// Estimated seconds remaining, when the client reports one.
    pub eta_seconds: Option<u64>,
    /// Total payload size in bytes, when known.
    pub total_bytes: u64,
}

impl TransferStatus {
    /// A completed status at 100% with the given total.
    #[must_use]
    pub const fn completed(total_bytes: u64) -> Self {
        Self {
            state: TransferState::Completed,
            progress: 100.0,
            speed_bps: 0,
            eta_seconds: None,
            total_bytes,
        }
    }
}

/// An external transfer client the router can drive.
///
/// Blocking clients (the cloud-copy tool) perform their whole transfer in
/// `start` and report `Completed` on the first poll.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Stable client name recorded on downloads and in health reports.
    fn name(&self) -> &'static str;

    /// Cadence the router polls this client at.
    fn poll_interval(&self) -> Duration;

    /// Hand the transfer to the client; returns the client-assigned
    /// handle.
    async fn start(
        &self,
        link: &ClassifiedLink,
        context: &TransferContext,
        cancel: &CancellationToken,
    ) -> DownloadResult<String>;

    /// Observe the transfer.
    async fn poll(
        &self,
        handle: &str,
        context: &TransferContext,
    ) -> DownloadResult<TransferStatus>;

    /// Best-effort removal of the transfer (and its partial data).
    async fn cancel(&self, handle: &str) -> DownloadResult<()>;

    /// Enumerate the files the completed transfer produced.
    async fn files(
        &self,
        handle: &str,
        context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>>;

    /// Whether the client is currently reachable.
    async fn health_check(&self) -> bool;
}
