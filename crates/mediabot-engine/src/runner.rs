//! Job runner: spawns and tracks one driver task per job.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::driver::PipelineDriver;

/// Spawns pipeline drivers and exposes per-job cancellation.
pub struct JobRunner {
    driver: Arc<PipelineDriver>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl JobRunner {
    /// Runner over a shared driver.
    #[must_use]
    pub fn new(driver: Arc<PipelineDriver>) -> Self {
        Self {
            driver,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The driver this runner spawns.
    #[must_use]
    pub fn driver(&self) -> Arc<PipelineDriver> {
        Arc::clone(&self.driver)
    }

    /// Spawn a driver task for the job unless one is already active.
    ///
    /// Returns `false` when the job is already being driven.
    pub async fn submit(&self, job_id: &str) -> bool {
        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            if active.contains_key(job_id) {
                return false;
            }
            active.insert(job_id.to_string(), token.clone());
        }

        let driver = Arc::clone(&self.driver);
        let registry = Arc::clone(&self.active);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            match driver.run(&job_id, token).await {
                Ok(state) => info!(job_id = %job_id, state = state.as_str(), "driver finished"),
                Err(err) => {
                    warn!(job_id = %job_id, code = err.code(), error = %err, "driver aborted");
                }
            }
            registry.lock().await.remove(&job_id);
        });
        true
    }

    /// Signal the job's driver to cancel at its next safe point.
    ///
    /// Returns `false` when no driver is active for the job.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a driver task is currently active for the job.
    pub async fn is_active(&self, job_id: &str) -> bool {
        self.active.lock().await.contains_key(job_id)
    }
}
