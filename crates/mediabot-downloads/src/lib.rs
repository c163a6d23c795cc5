#![forbid(unsafe_code)]

//! Downloader router over the four external transfer clients.
//!
//! The router classifies nothing itself; it receives a classified link,
//! picks the one client responsible for that family, supervises the
//! transfer with a client-specific poll cadence, forwards progress to an
//! observer, and enumerates the produced files on completion. Client
//! diagnostics travel verbatim; cancellation requests best-effort removal
//! of the transfer inside the client.

pub mod client;
pub mod clients;
pub mod router;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{DownloadClient, TransferContext, TransferState, TransferStatus};
pub use clients::{Aria2Client, QbittorrentClient, RcloneClient, SabnzbdClient};
pub use router::{DownloadOutcome, DownloadRouter};

/// Result alias for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Failures raised by the router or a client.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The link kind has no routable client (unknown or ftp).
    #[error("unsupported link kind")]
    Unsupported {
        /// Kind label that had no route.
        kind: String,
    },
    /// The chosen client reported a failure; the diagnostic is verbatim.
    #[error("download client failure")]
    Client {
        /// Client that failed.
        client: &'static str,
        /// Client diagnostic.
        message: String,
    },
    /// The transfer was cancelled through the caller's token.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Build a client failure preserving the diagnostic verbatim.
    #[must_use]
    pub fn client(client: &'static str, message: impl Into<String>) -> Self {
        Self::Client {
            client,
            message: message.into(),
        }
    }
}

/// Receives transfer progress while the router polls a client.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Called after every successful poll.
    async fn transfer_progress(&self, job_id: &str, client: &'static str, status: &TransferStatus);
}

/// Observer that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl ProgressObserver for NoopObserver {
    async fn transfer_progress(
        &self,
        _job_id: &str,
        _client: &'static str,
        _status: &TransferStatus,
    ) {
    }
}
