//! Logging initialisation.
//!
//! One entry point installing the global subscriber: pretty output for
//! debug builds, JSON in release, `RUST_LOG` overriding the default
//! `info` filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, AppResult};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub(crate) fn init_logging() -> AppResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let result = if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    };
    result.map_err(|err| AppError::Telemetry {
        message: err.to_string(),
    })
}
