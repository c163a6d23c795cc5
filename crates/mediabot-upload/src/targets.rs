//! Concrete upload targets.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediabot_exec::{CommandRunner, CommandSpec, ExecError};
use mediabot_model::UploadedFile;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{UploadError, UploadReceipt, UploadResult, UploadTarget};

/// Delivers packages through an `rclone copy` subprocess.
pub struct RcloneTarget {
    runner: Arc<dyn CommandRunner>,
    bin: PathBuf,
    config: Option<PathBuf>,
    remote: String,
    timeout: Duration,
}

impl RcloneTarget {
    /// Target copying into `<remote>/<jobId>` with the given rclone setup.
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

    fn command(&self, package_dir: &Path, destination: &str) -> CommandSpec {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.to_string_lossy().into_owned());
        }
        args.push("copy".to_string());
        args.push(package_dir.to_string_lossy().into_owned());
        args.push(destination.to_string());
        CommandSpec::new(self.bin.to_string_lossy().into_owned(), args)
    }
}

#[async_trait]
impl UploadTarget for RcloneTarget {
    fn name(&self) -> &str {
        "rclone"
    }

    async fn upload(
        &self,
        package_dir: &Path,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadReceipt> {
        let destination = format!("{}/{job_id}", self.remote.trim_end_matches('/'));
        let spec = self.command(package_dir, &destination);
        let output = self
            .runner
            .run(&spec, self.timeout, cancel)
            .await
            .map_err(|err| match err {
                ExecError::Cancelled => UploadError::Cancelled,
                other => UploadError::Target {
                    target: "rclone".into(),
                    message: other.to_string(),
                },
            })?;
        if !output.success() {
            return Err(UploadError::Target {
                target: "rclone".into(),
                message: mediabot_exec::truncate_stderr(&output.stderr),
            });
        }
        Ok(UploadReceipt {
            remote_location: destination.clone(),
            files: enumerate_local(package_dir, &destination)?,
        })
    }

    async fn health_check(&self) -> bool {
        let spec = CommandSpec::new(
            self.bin.to_string_lossy().into_owned(),
            vec!["version".to_string(), "--check=false".to_string()],
        );
        self.runner
            .run(&spec, Duration::from_secs(5), &CancellationToken::new())
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }
}

/// Copies packages under a local (or mounted) directory root; used for
/// directly attached object-storage mounts and in tests.
pub struct LocalDirTarget {
    root: PathBuf,
}

impl LocalDirTarget {
    /// Target rooted at the given directory.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl UploadTarget for LocalDirTarget {
    fn name(&self) -> &str {
        "local-dir"
    }

    async fn upload(
        &self,
        package_dir: &Path,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadReceipt> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let destination = self.root.join(job_id);
        let source = package_dir.to_path_buf();
        let destination_clone = destination.clone();
        tokio::task::spawn_blocking(move || copy_tree(&source, &destination_clone))
            .await
            .map_err(|err| UploadError::Target {
                target: "local-dir".into(),
                message: err.to_string(),
            })??;
        let location = destination.to_string_lossy().into_owned();
        Ok(UploadReceipt {
            files: enumerate_local(package_dir, &location)?,
            remote_location: location,
        })
    }

    async fn health_check(&self) -> bool {
        self.root.is_dir()
    }
}

fn copy_tree(source: &Path, destination: &Path) -> UploadResult<()> {
    let io_failure = |err: std::io::Error| UploadError::Target {
        target: "local-dir".into(),
        message: err.to_string(),
    };
    fs::create_dir_all(destination).map_err(io_failure)?;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|err| UploadError::Target {
            target: "local-dir".into(),
            message: err.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| UploadError::Target {
                target: "local-dir".into(),
                message: err.to_string(),
            })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target_path = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target_path).map_err(io_failure)?;
        } else {
            if let Some(parent) = target_path.parent() {
                fs::create_dir_all(parent).map_err(io_failure)?;
            }
            fs::copy(entry.path(), &target_path).map_err(io_failure)?;
        }
    }
    Ok(())
}

/// Build per-file receipts from the local package tree; sizes come from
/// disk, remote paths mirror the package-relative layout.
fn enumerate_local(package_dir: &Path, remote_location: &str) -> UploadResult<Vec<UploadedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(package_dir) {
        let entry = entry.map_err(|err| UploadError::Target {
            target: "enumerate".into(),
            message: err.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(package_dir)
            .map_err(|err| UploadError::Target {
                target: "enumerate".into(),
                message: err.to_string(),
            })?
            .to_string_lossy()
            .into_owned();
        let size = entry
            .metadata()
            .map_err(|err| UploadError::Target {
                target: "enumerate".into(),
                message: err.to_string(),
            })?
            .len();
        files.push(UploadedFile {
            remote_path: format!("{remote_location}/{relative}"),
            filename: relative,
            size,
            etag: None,
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}
