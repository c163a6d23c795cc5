//! In-memory progress store used in tests and REDIS-less deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mediabot_model::ProgressRecord;
use tokio::sync::Mutex;

use crate::{ProgressResult, ProgressStore, progress_key};

struct Entry {
    record: ProgressRecord,
    expires_at: Instant,
}

/// TTL-honouring progress store backed by a process-local map.
#[derive(Clone)]
pub struct MemoryProgressStore {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryProgressStore {
    /// Store with the given record TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn put(&self, record: &ProgressRecord) -> ProgressResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            progress_key(&record.job_id),
            Entry {
                record: record.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: &str) -> ProgressResult<Option<ProgressRecord>> {
        let key = progress_key(job_id);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.record.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, job_id: &str) -> ProgressResult<()> {
        self.entries.lock().await.remove(&progress_key(job_id));
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryProgressStore::new(Duration::from_secs(60));
        let record = ProgressRecord::stage("job-1", "torrent", "downloading", 40);
        store.put(&record).await.expect("put");
        let fetched = store.get("job-1").await.expect("get").expect("present");
        assert_eq!(fetched, record);
        store.delete("job-1").await.expect("delete");
        assert!(store.get("job-1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn updates_overwrite_last_writer_wins() {
        let store = MemoryProgressStore::new(Duration::from_secs(60));
        store
            .put(&ProgressRecord::stage("job-1", "torrent", "downloading", 10))
            .await
            .expect("put");
        store
            .put(&ProgressRecord::stage("job-1", "torrent", "downloading", 90))
            .await
            .expect("put");
        let fetched = store.get("job-1").await.expect("get").expect("present");
        assert_eq!(fetched.progress, 90);
    }

    #[tokio::test]
    async fn expired_records_vanish() {
        let store = MemoryProgressStore::new(Duration::from_millis(10));
        store
            .put(&ProgressRecord::stage("job-1", "torrent", "downloading", 10))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("job-1").await.expect("get").is_none());
    }
}
