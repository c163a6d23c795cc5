//! Stage-keyed concurrency limits shared by every job driver.

use tokio::sync::Semaphore;

/// Semaphores bounding how many jobs may occupy each heavy stage at once,
/// so the external binaries are never oversubscribed.
#[derive(Debug)]
pub struct StageLimits {
    /// Permits for the download stage.
    pub download: Semaphore,
    /// Permits for the probe/sync/process/validate stages.
    pub process: Semaphore,
    /// Permits for the upload stage.
    pub upload: Semaphore,
}

impl StageLimits {
    /// Limits with explicit capacities.
    #[must_use]
    pub const fn new(download: usize, process: usize, upload: usize) -> Self {
        Self {
            download: Semaphore::const_new(download),
            process: Semaphore::const_new(process),
            upload: Semaphore::const_new(upload),
        }
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self::new(4, 2, 4)
    }
}
