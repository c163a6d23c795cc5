#![forbid(unsafe_code)]

//! External-command execution for pipeline steps.
//!
//! # Design
//! - One trait seam (`CommandRunner`) so the driver can run against a fake
//!   in tests; the production implementation supervises a real subprocess.
//! - A non-zero exit is not an error at this layer; callers decide what an
//!   exit code means. Spawn failures, timeouts, and cancellation are.
//! - Processes are killed on timeout and on cancellation via
//!   `kill_on_drop`; suspension points are the only cancellation points.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum stderr bytes preserved in error reports.
pub const STDERR_LIMIT_BYTES: usize = 1000;

/// Result alias for command execution.
pub type ExecResult<T> = Result<T, ExecError>;

/// Failures raised while supervising a subprocess.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be spawned.
    #[error("failed to spawn command")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The process exceeded its allotted wall-clock time and was killed.
    #[error("command timed out")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Configured timeout.
        timeout: Duration,
    },
    /// The caller's cancellation token fired; the process was killed.
    #[error("command cancelled")]
    Cancelled,
    /// Captured output was not valid UTF-8.
    #[error("command produced undecodable output")]
    Decode {
        /// Program whose output failed to decode.
        program: String,
    },
}

/// A command to execute: program, argument vector, optional working
/// directory.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Argument vector, passed through without shell interpretation.
    pub args: Vec<String>,
    /// Working directory, when the command needs one.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Build a spec from a program and its arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    /// Display form used in logs and error reports.
    #[must_use]
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured outcome of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Full captured stdout.
    pub stdout: String,
    /// Full captured stderr.
    pub stderr: String,
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the process exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Seam between the pipeline driver and real subprocesses.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion, honouring the timeout and the
    /// cancellation token.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the process cannot start, `Timeout` when the
    /// deadline passes, and `Cancelled` when the token fires first.
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecResult<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecResult<CommandOutput> {
        let started = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!(command = %spec.display(), "running external command");
        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Dropping the in-flight future kills the child (kill_on_drop), so
        // both arms below leave no orphan behind.
        let waited = tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => waited,
            () = cancel.cancelled() => return Err(ExecError::Cancelled),
        };

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    program: spec.program.clone(),
                    source,
                });
            }
            Err(_elapsed) => {
                return Err(ExecError::Timeout {
                    program: spec.program.clone(),
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8(output.stdout).map_err(|_| ExecError::Decode {
            program: spec.program.clone(),
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

/// Truncate stderr to the reporting limit, respecting char boundaries.
#[must_use]
pub fn truncate_stderr(stderr: &str) -> String {
    if stderr.len() <= STDERR_LIMIT_BYTES {
        return stderr.to_string();
    }
    let mut cut = STDERR_LIMIT_BYTES;
    while cut > 0 && !stderr.is_char_boundary(cut) {
        cut -= 1;
    }
    stderr[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner;
        let spec = CommandSpec::new("sh", vec!["-c".into(), "printf hello".into()]);
        let output = runner
            .run(&spec, Duration::from_secs(5), &token())
            .await
            .expect("command runs");
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_exec_error() {
        let runner = ProcessRunner;
        let spec = CommandSpec::new(
            "sh",
            vec!["-c".into(), "printf oops >&2; exit 3".into()],
        );
        let output = runner
            .run(&spec, Duration::from_secs(5), &token())
            .await
            .expect("command runs");
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "oops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let runner = ProcessRunner;
        let spec = CommandSpec::new("sleep", vec!["30".into()]);
        let err = runner
            .run(&spec, Duration::from_millis(100), &token())
            .await
            .expect_err("must time out");
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_preempts_the_process() {
        let runner = ProcessRunner;
        let spec = CommandSpec::new("sleep", vec!["30".into()]);
        let cancel = token();
        cancel.cancel();
        let err = runner
            .run(&spec, Duration::from_secs(5), &cancel)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner;
        let spec = CommandSpec::new("mediabot-no-such-binary", vec![]);
        let err = runner
            .run(&spec, Duration::from_secs(1), &token())
            .await
            .expect_err("must fail to spawn");
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn stderr_truncation_respects_char_boundaries() {
        let long = "é".repeat(800);
        let truncated = truncate_stderr(&long);
        assert!(truncated.len() <= STDERR_LIMIT_BYTES);
        assert!(long.starts_with(&truncated));
        assert_eq!(truncate_stderr("short"), "short");
    }
}
