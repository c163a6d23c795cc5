//! Redis-backed progress store.

use std::time::Duration;

use async_trait::async_trait;
use mediabot_model::ProgressRecord;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::{ProgressResult, ProgressStore, ProgressStoreError, progress_key};

/// Progress store on a shared Redis instance, with JSON payloads and
/// per-key TTL refresh on every write.
#[derive(Clone)]
pub struct RedisProgressStore {
    connection: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisProgressStore {
    /// Connect to Redis and build the store.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the URL is malformed or the initial
    /// connection cannot be established.
    pub async fn connect(url: &str, ttl: Duration) -> ProgressResult<Self> {
        let client = redis::Client::open(url).map_err(|err| ProgressStoreError::Backend {
            operation: "progress.connect",
            message: err.to_string(),
        })?;
        let connection =
            ConnectionManager::new(client)
                .await
                .map_err(|err| ProgressStoreError::Backend {
                    operation: "progress.connect",
                    message: err.to_string(),
                })?;
        Ok(Self {
            connection,
            ttl_seconds: ttl.as_secs().max(1),
        })
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn put(&self, record: &ProgressRecord) -> ProgressResult<()> {
        let payload =
            serde_json::to_string(record).map_err(|err| ProgressStoreError::Backend {
                operation: "progress.put",
                message: err.to_string(),
            })?;
        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(progress_key(&record.job_id), payload, self.ttl_seconds)
            .await
            .map_err(|err| ProgressStoreError::Backend {
                operation: "progress.put",
                message: err.to_string(),
            })
    }

    async fn get(&self, job_id: &str) -> ProgressResult<Option<ProgressRecord>> {
        let key = progress_key(job_id);
        let mut connection = self.connection.clone();
        let payload: Option<String> =
            connection
                .get(&key)
                .await
                .map_err(|err| ProgressStoreError::Backend {
                    operation: "progress.get",
                    message: err.to_string(),
                })?;
        payload
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| ProgressStoreError::Decode {
                    key: key.clone(),
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    async fn delete(&self, job_id: &str) -> ProgressResult<()> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(progress_key(job_id))
            .await
            .map_err(|err| ProgressStoreError::Backend {
                operation: "progress.delete",
                message: err.to_string(),
            })
    }

    async fn ping(&self) -> bool {
        let mut connection = self.connection.clone();
        match redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "progress store ping failed");
                false
            }
        }
    }
}
