#![forbid(unsafe_code)]

//! Binary entrypoint that wires the mediabot services together and serves
//! the API until shutdown.

mod bootstrap;
mod error;
mod telemetry;

use std::process::ExitCode;

use error::AppError;

/// Exit codes: 0 on clean shutdown, 2 on invalid configuration, 1 on any
/// other failure.
#[tokio::main]
async fn main() -> ExitCode {
    match bootstrap::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ AppError::Config { .. }) => {
            eprintln!("configuration error: {err:#}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::from(1)
        }
    }
}
