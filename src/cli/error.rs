//! Error types for Claude CLI invocations.

use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::ConcurrencyLimitError;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied executing {}", .0.display())]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    pub(crate) fn from_io(err: std::io::Error, binary: PathBuf) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary),
            _ => Self::Io(err),
        }
    }
}

/// Failure of one CLI invocation.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The concurrency gate refused admission; nothing was spawned.
    #[error(transparent)]
    ConcurrencyLimit(#[from] ConcurrencyLimitError),

    /// The child could not be started.
    #[error("Failed to spawn Claude CLI: {0}")]
    Spawn(#[from] SpawnError),

    /// The child exited unsuccessfully without being asked to stop.
    #[error("claude -p exited with {}: {stderr}", describe_code(.code))]
    Execution {
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Trimmed stderr, `"unknown error"` when empty.
        stderr: String,
    },

    /// The child outlived the configured timeout and was killed.
    #[error("claude -p timed out after {}ms: {stderr}", .after.as_millis())]
    Timeout {
        /// Configured timeout that was exceeded.
        after: Duration,
        /// Trimmed stderr captured before the kill, `"no stderr output"` when empty.
        stderr: String,
    },

    /// Reading the child's pipes or waiting on it failed.
    #[error("I/O error talking to Claude CLI: {0}")]
    Io(#[from] std::io::Error),

    /// A pipe was not captured at spawn.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

impl ProcessError {
    /// Build an `Execution` error from an exit code and raw stderr.
    #[must_use]
    pub fn execution(code: Option<i32>, stderr: &str) -> Self {
        let stderr = stderr.trim();
        Self::Execution {
            code,
            stderr: if stderr.is_empty() {
                "unknown error".to_string()
            } else {
                stderr.to_string()
            },
        }
    }

    /// Build a `Timeout` error from the limit and raw stderr.
    #[must_use]
    pub fn timeout(after: Duration, stderr: &str) -> Self {
        let stderr = stderr.trim();
        Self::Timeout {
            after,
            stderr: if stderr.is_empty() {
                "no stderr output".to_string()
            } else {
                stderr.to_string()
            },
        }
    }

    /// Whether the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyLimit(_))
    }

    /// Suggested retry delay, present only for admission refusals.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ConcurrencyLimit(err) => Some(err.retry_after),
            _ => None,
        }
    }
}
