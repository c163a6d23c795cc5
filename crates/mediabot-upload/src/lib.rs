#![forbid(unsafe_code)]

//! Upload routing for packaged jobs.
//!
//! A router owns one primary target and optionally one secondary. The
//! package directory is handed to the primary; on failure the router logs
//! and fails over to the secondary when configured. The produced
//! `UploadManifest` is the package manifest plus the serving target and
//! remote location.

mod targets;

use std::path::Path;
use std::sync::Arc;

use mediabot_model::{PackageManifest, UploadManifest, UploadedFile};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use targets::{LocalDirTarget, RcloneTarget};

use async_trait::async_trait;

/// Result alias for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Failures raised while delivering a package.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The target rejected or failed the delivery.
    #[error("upload target failure")]
    Target {
        /// Target that failed.
        target: String,
        /// Target diagnostic.
        message: String,
    },
    /// The operation observed its cancellation token.
    #[error("upload cancelled")]
    Cancelled,
}

/// Receipt returned by a target after a successful delivery.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Remote location the package landed at.
    pub remote_location: String,
    /// Per-file delivery records.
    pub files: Vec<UploadedFile>,
}

/// A storage destination the router can deliver packages to.
#[async_trait]
pub trait UploadTarget: Send + Sync {
    /// Stable target name recorded in the upload manifest.
    fn name(&self) -> &str;

    /// Deliver the package directory for a job.
    async fn upload(
        &self,
        package_dir: &Path,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadReceipt>;

    /// Whether the target is currently reachable.
    async fn health_check(&self) -> bool;
}

/// Dispatches packages to the configured targets.
#[derive(Clone)]
pub struct UploadRouter {
    primary: Arc<dyn UploadTarget>,
    secondary: Option<Arc<dyn UploadTarget>>,
}

impl UploadRouter {
    /// Router with a primary and optional secondary target.
    #[must_use]
    pub fn new(primary: Arc<dyn UploadTarget>, secondary: Option<Arc<dyn UploadTarget>>) -> Self {
        Self { primary, secondary }
    }

    /// Deliver a packaged directory, producing the upload manifest.
    ///
    /// # Errors
    ///
    /// Returns the primary's failure when no secondary is configured, the
    /// secondary's failure when both fail, and `Cancelled` when the token
    /// fires.
    pub async fn upload(
        &self,
        package_dir: &Path,
        job_id: &str,
        manifest: &PackageManifest,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadManifest> {
        match self.try_target(&self.primary, package_dir, job_id, manifest, cancel).await {
            Ok(uploaded) => Ok(uploaded),
            Err(UploadError::Cancelled) => Err(UploadError::Cancelled),
            Err(primary_err) => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        job_id,
                        target = self.primary.name(),
                        error = %primary_err,
                        "primary upload target failed; trying secondary"
                    );
                    self.try_target(secondary, package_dir, job_id, manifest, cancel)
                        .await
                }
                None => Err(primary_err),
            },
        }
    }

    /// Health of every configured target, primary first.
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let mut report = vec![(
            self.primary.name().to_string(),
            self.primary.health_check().await,
        )];
        if let Some(secondary) = &self.secondary {
            report.push((secondary.name().to_string(), secondary.health_check().await));
        }
        report
    }

    async fn try_target(
        &self,
        target: &Arc<dyn UploadTarget>,
        package_dir: &Path,
        job_id: &str,
        manifest: &PackageManifest,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadManifest> {
        let receipt = target.upload(package_dir, job_id, cancel).await?;
        Ok(UploadManifest {
            package: manifest.clone(),
            target: target.name().to_string(),
            location: receipt.remote_location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FailingTarget;

    #[async_trait]
    impl UploadTarget for FailingTarget {
        fn name(&self) -> &str {
            "failing"
        }

        async fn upload(
            &self,
            _package_dir: &Path,
            _job_id: &str,
            _cancel: &CancellationToken,
        ) -> UploadResult<UploadReceipt> {
            Err(UploadError::Target {
                target: "failing".into(),
                message: "remote unavailable".into(),
            })
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    struct AcceptingTarget;

    #[async_trait]
    impl UploadTarget for AcceptingTarget {
        fn name(&self) -> &str {
            "accepting"
        }

        async fn upload(
            &self,
            _package_dir: &Path,
            job_id: &str,
            _cancel: &CancellationToken,
        ) -> UploadResult<UploadReceipt> {
            Ok(UploadReceipt {
                remote_location: format!("remote:packages/{job_id}"),
                files: Vec::new(),
            })
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn manifest() -> PackageManifest {
        PackageManifest {
            job_id: "job-1".into(),
            created_at: Utc::now(),
            files: Vec::new(),
            total_size: 0,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn failover_to_secondary_serves_the_upload() {
        let router = UploadRouter::new(Arc::new(FailingTarget), Some(Arc::new(AcceptingTarget)));
        let uploaded = router
            .upload(
                Path::new("/tmp/pkg"),
                "job-1",
                &manifest(),
                &CancellationToken::new(),
            )
            .await
            .expect("secondary serves");
        assert_eq!(uploaded.target, "accepting");
        assert_eq!(uploaded.location, "remote:packages/job-1");
    }

    #[tokio::test]
    async fn primary_failure_without_secondary_is_fatal() {
        let router = UploadRouter::new(Arc::new(FailingTarget), None);
        let err = router
            .upload(
                Path::new("/tmp/pkg"),
                "job-1",
                &manifest(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, UploadError::Target { .. }));
    }
}
