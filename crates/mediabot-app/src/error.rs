//! Application bootstrap errors.

use thiserror::Error;

/// Result alias for bootstrap operations.
pub type AppResult<T> = Result<T, AppError>;

/// Failures raised while wiring and serving the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded; the process exits with code 2.
    #[error("invalid configuration")]
    Config {
        /// Underlying configuration error.
        #[from]
        source: mediabot_config::ConfigError,
    },
    /// The durable store could not be initialised.
    #[error("store initialisation failed")]
    Store {
        /// Underlying store error.
        source: mediabot_model::StoreError,
    },
    /// The ephemeral progress store could not be initialised.
    #[error("progress store initialisation failed")]
    Progress {
        /// Underlying progress store error.
        source: mediabot_progress::ProgressStoreError,
    },
    /// A download client could not be constructed.
    #[error("download client initialisation failed")]
    Clients {
        /// Underlying client error.
        source: mediabot_downloads::DownloadError,
    },
    /// The configured bind address is not `host:port`.
    #[error("invalid api bind address")]
    BindAddr {
        /// Offending value.
        value: String,
    },
    /// Installing the tracing subscriber failed.
    #[error("telemetry initialisation failed")]
    Telemetry {
        /// Subscriber diagnostic.
        message: String,
    },
    /// The API listener failed to bind or serve.
    #[error("api server failed")]
    Serve {
        /// Underlying IO error.
        source: std::io::Error,
    },
}
