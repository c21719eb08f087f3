// ABOUTME: Task error types with SNAFU pattern.
// ABOUTME: Classifies task failures so the orchestrator can tell advisory failures from interruptions.

use snafu::Snafu;
use std::time::Duration;

/// Errors from a remote command channel.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),
}

/// Errors from an HTTP probe.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),
}

/// A failed task attempt or run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    #[snafu(display("task {task} timed out after {timeout:?}"))]
    TimedOut { task: String, timeout: Duration },

    #[snafu(display("task {task} stopped: deployment deadline exceeded"))]
    DeadlineExceeded { task: String },

    #[snafu(display("task {task} cancelled"))]
    Cancelled { task: String },

    #[snafu(display("task {task}: {reason}"))]
    CheckFailed { task: String, reason: String },

    #[snafu(display("task {task}: command exited with code {code}: {stderr}"))]
    NonZeroExit {
        task: String,
        code: u32,
        stderr: String,
    },

    #[snafu(display("task {task}: instance has no reachable address"))]
    NoAddress { task: String },

    #[snafu(display("task {task}: probe failed: {source}"))]
    Probe { task: String, source: ProbeError },

    #[snafu(display("task {task}: remote execution failed: {source}"))]
    Remote { task: String, source: ExecError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// One attempt exceeded its own timeout.
    Timeout,
    /// The deployment budget ran out.
    DeadlineExceeded,
    /// The deployment was cancelled.
    Cancelled,
    /// The task ran but its expectation did not hold.
    CheckFailed,
    /// The task could not reach the instance.
    Unreachable,
}

impl TaskError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::TimedOut { .. } => TaskErrorKind::Timeout,
            TaskError::DeadlineExceeded { .. } => TaskErrorKind::DeadlineExceeded,
            TaskError::Cancelled { .. } => TaskErrorKind::Cancelled,
            TaskError::CheckFailed { .. } | TaskError::NonZeroExit { .. } => {
                TaskErrorKind::CheckFailed
            }
            TaskError::NoAddress { .. } | TaskError::Probe { .. } | TaskError::Remote { .. } => {
                TaskErrorKind::Unreachable
            }
        }
    }

    /// True when the run as a whole must stop rather than move to the next task.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self.kind(),
            TaskErrorKind::DeadlineExceeded | TaskErrorKind::Cancelled
        )
    }
}
