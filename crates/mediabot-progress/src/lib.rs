#![forbid(unsafe_code)]

//! Ephemeral per-job progress channel.
//!
//! Records are keyed by job id, TTL-bounded, overwritten on every update,
//! and deleted when the job leaves the pipeline. Last-writer-wins is
//! acceptable because only the job's driver writes its key. A polling
//! reader at 1 Hz converges; no change notification is offered.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use mediabot_model::ProgressRecord;
use thiserror::Error;

pub use memory::MemoryProgressStore;
pub use redis_store::RedisProgressStore;

/// Key prefix shared with every consumer of the ephemeral store.
const KEY_PREFIX: &str = "media-bot:progress:";

/// Result alias for progress-store operations.
pub type ProgressResult<T> = Result<T, ProgressStoreError>;

/// Failures raised by a progress-store adapter.
#[derive(Debug, Error)]
pub enum ProgressStoreError {
    /// The backing store rejected or failed the operation.
    #[error("progress store backend failure")]
    Backend {
        /// Operation that failed.
        operation: &'static str,
        /// Backend diagnostic.
        message: String,
    },
    /// A stored payload could not be decoded.
    #[error("progress record decode failure")]
    Decode {
        /// Key whose payload failed to decode.
        key: String,
        /// Decode diagnostic.
        message: String,
    },
}

/// Store key for a job's progress record.
#[must_use]
pub fn progress_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}{job_id}")
}

/// Keyed ephemeral store for per-job progress records.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Write (or overwrite) the record under its job key, refreshing the
    /// TTL.
    async fn put(&self, record: &ProgressRecord) -> ProgressResult<()>;
    /// Read the record for a job, if one is live.
    async fn get(&self, job_id: &str) -> ProgressResult<Option<ProgressRecord>>;
    /// Delete the record for a job; absent keys are not an error.
    async fn delete(&self, job_id: &str) -> ProgressResult<()>;
    /// Whether the backing store is reachable.
    async fn ping(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_per_contract() {
        assert_eq!(progress_key("job-1"), "media-bot:progress:job-1");
    }
}
