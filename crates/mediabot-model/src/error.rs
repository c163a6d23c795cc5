//! # Design
//!
//! - One tagged error taxonomy crosses stage boundaries; each kind carries
//!   a stable code string plus a structured details mapping.
//! - Messages are constant; operational context lives in fields.
//! - Stderr captured into `CommandExecution` is truncated to 1000 bytes at
//!   the capture site, never here.

use serde_json::{Value, json};
use thiserror::Error;

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure taxonomy shared by every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input rejected before any work started.
    #[error("invalid input")]
    Validation {
        /// Field that failed validation.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// A referenced entity does not exist.
    #[error("entity not found")]
    NotFound {
        /// Entity kind (e.g. `job`).
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// The requested arc is not in the transition table.
    #[error("illegal state transition")]
    InvalidStateTransition {
        /// State the job was in.
        from: &'static str,
        /// State the caller requested.
        to: &'static str,
    },
    /// An external command exited abnormally or timed out.
    #[error("external command failed")]
    CommandExecution {
        /// Program plus arguments as a display string.
        command: String,
        /// Exit code when the process exited; `None` when killed.
        exit_code: Option<i32>,
        /// Trailing stderr, truncated to 1000 bytes.
        stderr: String,
    },
    /// The submitted link cannot be routed to any client.
    #[error("unsupported link")]
    UnsupportedLink {
        /// Link or classified kind that had no route.
        link: String,
    },
    /// A download client reported a failure.
    #[error("download client failure")]
    DownloadClient {
        /// Client that failed.
        client: &'static str,
        /// Client diagnostic, verbatim.
        message: String,
    },
    /// The sync engine refused to emit a correction.
    #[error("sync correction rejected")]
    SyncRejected {
        /// Rejection reason (`low-confidence`, `mixed-symptoms`, ...).
        reason: String,
    },
    /// Packaging aborted; partially-moved files remain in place.
    #[error("packaging failed")]
    PackageFailure {
        /// Operation that aborted the package step.
        operation: &'static str,
        /// Underlying failure detail.
        message: String,
    },
    /// Upload to the configured target failed.
    #[error("upload failed")]
    UploadFailure {
        /// Target that rejected the package.
        target: String,
        /// Underlying failure detail.
        message: String,
    },
    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
    /// The retry counter reached its cap; the job fails permanently.
    #[error("retry budget exhausted")]
    RetryExhausted {
        /// Attempts consumed, including the original run.
        attempts: u32,
    },
    /// Persistence failed; logged and re-raised, never swallowed.
    #[error("storage failure")]
    Storage {
        /// Store operation that failed.
        operation: &'static str,
        /// Backend diagnostic.
        message: String,
    },
}

impl PipelineError {
    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::CommandExecution { .. } => "command_execution",
            Self::UnsupportedLink { .. } => "unsupported_link",
            Self::DownloadClient { .. } => "download_client",
            Self::SyncRejected { .. } => "sync_rejected",
            Self::PackageFailure { .. } => "package_failure",
            Self::UploadFailure { .. } => "upload_failure",
            Self::Cancelled => "cancelled",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Storage { .. } => "storage",
        }
    }

    /// Structured context for logs and API envelopes.
    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::Validation { field, reason } => json!({ "field": field, "reason": reason }),
            Self::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            Self::InvalidStateTransition { from, to } => json!({ "from": from, "to": to }),
            Self::CommandExecution {
                command,
                exit_code,
                stderr,
            } => json!({ "command": command, "exitCode": exit_code, "stderr": stderr }),
            Self::UnsupportedLink { link } => json!({ "link": link }),
            Self::DownloadClient { client, message } => {
                json!({ "client": client, "message": message })
            }
            Self::SyncRejected { reason } => json!({ "reason": reason }),
            Self::PackageFailure { operation, message } => {
                json!({ "operation": operation, "message": message })
            }
            Self::UploadFailure { target, message } => {
                json!({ "target": target, "message": message })
            }
            Self::Cancelled => json!({}),
            Self::RetryExhausted { attempts } => json!({ "attempts": attempts }),
            Self::Storage { operation, message } => {
                json!({ "operation": operation, "message": message })
            }
        }
    }

    /// Whether this failure is a cooperative cancellation rather than an
    /// error to surface to the user.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            PipelineError::UnsupportedLink {
                link: "ftp://x".into()
            }
            .code(),
            "unsupported_link"
        );
        assert_eq!(PipelineError::Cancelled.code(), "cancelled");
        assert_eq!(
            PipelineError::RetryExhausted { attempts: 3 }.code(),
            "retry_exhausted"
        );
    }

    #[test]
    fn details_carry_structured_context() {
        let err = PipelineError::CommandExecution {
            command: "ffmpeg -i in.mkv".into(),
            exit_code: Some(1),
            stderr: "boom".into(),
        };
        let details = err.details();
        assert_eq!(details["exitCode"], 1);
        assert_eq!(details["stderr"], "boom");
    }
}
