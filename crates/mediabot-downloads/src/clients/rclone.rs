//! rclone adapter for Google Drive transfers.
//!
//! rclone has no daemon to poll; the whole copy runs as one blocking
//! subprocess invocation inside `start`, and the first poll reports
//! completion. Cancellation kills the subprocess through the runner's
//! token.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_exec::{CommandRunner, CommandSpec, ExecError};
use mediabot_link::ClassifiedLink;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{DownloadClient, TransferContext, TransferStatus};
use crate::{DownloadError, DownloadResult};

const NAME: &str = "rclone";

/// Adapter invoking the rclone binary for drive links.
pub struct RcloneClient {
    runner: Arc<dyn CommandRunner>,
    bin: PathBuf,
    config: Option<PathBuf>,
    remote: String,
    timeout: Duration,
}

impl RcloneClient {
    /// Client invoking the given binary against a configured remote.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        bin: PathBuf,
        config: Option<PathBuf>,
        remote: String,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            bin,
            config,
            remote,
            timeout,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.to_string_lossy().into_owned());
        }
        args
    }

    fn copy_args(&self, link: &ClassifiedLink, output_dir: &str) -> DownloadResult<Vec<String>> {
        let drive = link
            .gdrive
            .as_ref()
            .ok_or_else(|| DownloadError::client(NAME, "link carries no drive metadata"))?;
        let mut args = self.base_args();
        if let Some(file_id) = &drive.file_id {
            args.extend([
                "backend".to_string(),
                "copyid".to_string(),
                self.remote.clone(),
                file_id.clone(),
                format!("{output_dir}/"),
            ]);
        } else if let Some(folder_id) = &drive.folder_id {
            args.extend([
                "copy".to_string(),
                self.remote.clone(),
                output_dir.to_string(),
                "--drive-root-folder-id".to_string(),
                folder_id.clone(),
            ]);
        } else {
            return Err(DownloadError::client(
                NAME,
                "drive link carries neither a file id nor a folder id",
            ));
        }
        Ok(args)
    }
}

#[async_trait]
impl DownloadClient for RcloneClient {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    async fn start(
        &self,
        link: &ClassifiedLink,
        context: &TransferContext,
        cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        fs::create_dir_all(&context.output_dir)
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        let output_dir = context.output_dir.to_string_lossy().into_owned();
        let args = self.copy_args(link, &output_dir)?;
        let spec = CommandSpec::new(self.bin.to_string_lossy().into_owned(), args);
        let output = self
            .runner
            .run(&spec, self.timeout, cancel)
            .await
            .map_err(|err| match err {
                ExecError::Cancelled => DownloadError::Cancelled,
                other => DownloadError::client(NAME, other.to_string()),
            })?;
        if !output.success() {
            return Err(DownloadError::client(
                NAME,
                mediabot_exec::truncate_stderr(&output.stderr),
            ));
        }
        info!(job_id = %context.job_id, "cloud copy finished");
        Ok(context.job_id.clone())
    }

    async fn poll(
        &self,
        _handle: &str,
        _context: &TransferContext,
    ) -> DownloadResult<TransferStatus> {
        // The copy already happened in start.
        Ok(TransferStatus::completed(0))
    }

    async fn cancel(&self, _handle: &str) -> DownloadResult<()> {
        // Nothing to remove; the subprocess dies with the token.
        Ok(())
    }

    async fn files(
        &self,
        _handle: &str,
        context: &TransferContext,
    ) -> DownloadResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = fs::read_dir(&context.output_dir)
            .map_err(|err| DownloadError::client(NAME, err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| DownloadError::client(NAME, err.to_string()))?;
            files.push(entry.path());
        }
        files.sort();
        Ok(files)
    }

    async fn health_check(&self) -> bool {
        let mut args = self.base_args();
        args.push("version".to_string());
        let spec = CommandSpec::new(self.bin.to_string_lossy().into_owned(), args);
        self.runner
            .run(&spec, Duration::from_secs(5), &CancellationToken::new())
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }
}
