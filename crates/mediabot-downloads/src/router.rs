//! Routing, supervision, and health probing over the four clients.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediabot_link::{ClassifiedLink, LinkKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{DownloadClient, TransferContext, TransferState};
use crate::{DownloadError, DownloadResult, ProgressObserver};

/// Outcome of a routed, completed transfer.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Files the client produced.
    pub files: Vec<PathBuf>,
    /// Payload size in bytes.
    pub total_bytes: u64,
    /// Wall-clock transfer duration in milliseconds.
    pub duration_ms: u64,
    /// Name of the client that served the transfer.
    pub client: &'static str,
    /// Client-assigned transfer handle.
    pub handle: String,
}

/// Multiplexes transfers over the four external clients.
#[derive(Clone)]
pub struct DownloadRouter {
    torrent: Arc<dyn DownloadClient>,
    direct: Arc<dyn DownloadClient>,
    cloud: Arc<dyn DownloadClient>,
    usenet: Arc<dyn DownloadClient>,
    health_probe_timeout: Duration,
}

impl DownloadRouter {
    /// Router over explicit client instances.
    #[must_use]
    pub fn new(
        torrent: Arc<dyn DownloadClient>,
        direct: Arc<dyn DownloadClient>,
        cloud: Arc<dyn DownloadClient>,
        usenet: Arc<dyn DownloadClient>,
        health_probe_timeout: Duration,
    ) -> Self {
        Self {
            torrent,
            direct,
            cloud,
            usenet,
            health_probe_timeout,
        }
    }

    fn route(&self, kind: LinkKind) -> DownloadResult<&Arc<dyn DownloadClient>> {
        match kind {
            LinkKind::Magnet | LinkKind::Torrent => Ok(&self.torrent),
            LinkKind::Http | LinkKind::Https => Ok(&self.direct),
            LinkKind::Gdrive => Ok(&self.cloud),
            LinkKind::Nzb => Ok(&self.usenet),
            LinkKind::Ftp => Err(DownloadError::Unsupported {
                kind: kind.as_str().to_string(),
            }),
        }
    }

    /// Name of the client that would serve a link kind.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for kinds with no route.
    pub fn client_name(&self, kind: LinkKind) -> DownloadResult<&'static str> {
        self.route(kind).map(|client| client.name())
    }

    /// Drive a classified link through its client until completion.
    ///
    /// At most one client is invoked. The router polls at the client's
    /// cadence, forwards each observation to the observer, and enumerates
    /// output files once the client reports completion. On cancellation
    /// the transfer is removed from the client (best effort) and
    /// `Cancelled` is returned.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for unroutable kinds, `Client` with the
    /// client's verbatim diagnostic on failure, and `Cancelled` when the
    /// token fires.
    pub async fn download(
        &self,
        link: &ClassifiedLink,
        context: &TransferContext,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> DownloadResult<DownloadOutcome> {
        let client = self.route(link.kind)?;
        let started = Instant::now();
        let handle = client.start(link, context, cancel).await?;
        info!(
            job_id = %context.job_id,
            client = client.name(),
            handle = %handle,
            "transfer started"
        );

        let mut last_total = 0u64;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(err) = client.cancel(&handle).await {
                        warn!(
                            job_id = %context.job_id,
                            client = client.name(),
                            error = %err,
                            "failed to remove cancelled transfer"
                        );
                    }
                    return Err(DownloadError::Cancelled);
                }
                () = tokio::time::sleep(client.poll_interval()) => {}
            }

            let status = client.poll(&handle, context).await?;
            observer
                .transfer_progress(&context.job_id, client.name(), &status)
                .await;
            if status.total_bytes > 0 {
                last_total = status.total_bytes;
            }

            match status.state {
                TransferState::Completed => {
                    let files = client.files(&handle, context).await?;
                    let total_bytes = if last_total > 0 {
                        last_total
                    } else {
                        sum_sizes(&files)
                    };
                    return Ok(DownloadOutcome {
                        files,
                        total_bytes,
                        duration_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                        client: client.name(),
                        handle,
                    });
                }
                TransferState::Failed(message) => {
                    return Err(DownloadError::Client {
                        client: client.name(),
                        message,
                    });
                }
                TransferState::Queued | TransferState::Active => {}
            }
        }
    }

    /// Probe every client in parallel; each probe is bounded by the
    /// configured timeout.
    pub async fn health_check(&self) -> BTreeMap<&'static str, bool> {
        let probe = |client: Arc<dyn DownloadClient>| {
            let timeout = self.health_probe_timeout;
            async move {
                let healthy = tokio::time::timeout(timeout, client.health_check())
                    .await
                    .unwrap_or(false);
                (client.name(), healthy)
            }
        };
        let (torrent, direct, cloud, usenet) = tokio::join!(
            probe(Arc::clone(&self.torrent)),
            probe(Arc::clone(&self.direct)),
            probe(Arc::clone(&self.cloud)),
            probe(Arc::clone(&self.usenet)),
        );
        BTreeMap::from([torrent, direct, cloud, usenet])
    }
}

fn sum_sizes(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|path| std::fs::metadata(path).ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopObserver;
    use crate::client::TransferStatus;
    use async_trait::async_trait;
    use mediabot_link::classify;
    use mediabot_model::JobPriority;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        name: &'static str,
        polls: AtomicUsize,
        script: Vec<TransferState>,
        cancelled: Mutex<Vec<String>>,
        produced: Vec<PathBuf>,
    }

    impl ScriptedClient {
        fn new(name: &'static str, script: Vec<TransferState>, produced: Vec<PathBuf>) -> Self {
            Self {
                name,
                polls: AtomicUsize::new(0),
                script,
                cancelled: Mutex::new(Vec::new()),
                produced,
            }
        }
    }

    #[async_trait]
    impl DownloadClient for ScriptedClient {
        fn name(&self) -> &'static str {
            self.name
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn start(
            &self,
            _link: &ClassifiedLink,
            context: &TransferContext,
            _cancel: &CancellationToken,
        ) -> DownloadResult<String> {
            Ok(format!("handle-{}", context.job_id))
        }

        async fn poll(
            &self,
            _handle: &str,
            _context: &TransferContext,
        ) -> DownloadResult<TransferStatus> {
            let index = self.polls.fetch_add(1, Ordering::SeqCst);
            let state = self
                .script
                .get(index)
                .cloned()
                .unwrap_or(TransferState::Completed);
            Ok(TransferStatus {
                state,
                progress: 50.0,
                speed_bps: 1_000,
                eta_seconds: Some(10),
                total_bytes: 4_096,
            })
        }

        async fn cancel(&self, handle: &str) -> DownloadResult<()> {
            self.cancelled.lock().expect("lock").push(handle.to_string());
            Ok(())
        }

        async fn files(
            &self,
            _handle: &str,
            _context: &TransferContext,
        ) -> DownloadResult<Vec<PathBuf>> {
            Ok(self.produced.clone())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn router_with(torrent: Arc<dyn DownloadClient>) -> DownloadRouter {
        let stub = |name: &'static str| -> Arc<dyn DownloadClient> {
            Arc::new(ScriptedClient::new(name, vec![], vec![]))
        };
        DownloadRouter::new(
            torrent,
            stub("direct"),
            stub("cloud"),
            stub("usenet"),
            Duration::from_secs(5),
        )
    }

    fn context() -> TransferContext {
        TransferContext {
            job_id: "job-1".into(),
            output_dir: PathBuf::from("/tmp/out"),
            priority: JobPriority::Normal,
        }
    }

    #[tokio::test]
    async fn routes_magnet_to_torrent_client_and_completes() {
        let torrent = Arc::new(ScriptedClient::new(
            "torrent",
            vec![TransferState::Active, TransferState::Completed],
            vec![PathBuf::from("/tmp/out/a.mkv")],
        ));
        let router = router_with(torrent);
        let link = classify("magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD")
            .expect("magnet");
        let outcome = router
            .download(&link, &context(), &CancellationToken::new(), &NoopObserver)
            .await
            .expect("completes");
        assert_eq!(outcome.client, "torrent");
        assert_eq!(outcome.total_bytes, 4_096);
        assert_eq!(outcome.files.len(), 1);
    }

    #[tokio::test]
    async fn client_failure_carries_diagnostic_verbatim() {
        let torrent = Arc::new(ScriptedClient::new(
            "torrent",
            vec![TransferState::Failed("tracker exploded".into())],
            vec![],
        ));
        let router = router_with(torrent);
        let link = classify("magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD")
            .expect("magnet");
        let err = router
            .download(&link, &context(), &CancellationToken::new(), &NoopObserver)
            .await
            .expect_err("fails");
        match err {
            DownloadError::Client { client, message } => {
                assert_eq!(client, "torrent");
                assert_eq!(message, "tracker exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_removes_the_transfer() {
        let torrent = Arc::new(ScriptedClient::new(
            "torrent",
            vec![TransferState::Active; 100],
            vec![],
        ));
        let router = router_with(Arc::clone(&torrent) as Arc<dyn DownloadClient>);
        let link = classify("magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD")
            .expect("magnet");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = router
            .download(&link, &context(), &cancel, &NoopObserver)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, DownloadError::Cancelled));
        assert_eq!(
            torrent.cancelled.lock().expect("lock").as_slice(),
            ["handle-job-1"]
        );
    }

    #[tokio::test]
    async fn ftp_is_unsupported() {
        let router = router_with(Arc::new(ScriptedClient::new("torrent", vec![], vec![])));
        let link = classify("ftp://host/file").expect("ftp");
        let err = router
            .download(&link, &context(), &CancellationToken::new(), &NoopObserver)
            .await
            .expect_err("unsupported");
        assert!(matches!(err, DownloadError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn health_check_reports_all_clients() {
        let router = router_with(Arc::new(ScriptedClient::new("torrent", vec![], vec![])));
        let report = router.health_check().await;
        assert_eq!(report.len(), 4);
        assert!(report.values().all(|healthy| *healthy));
    }
}
