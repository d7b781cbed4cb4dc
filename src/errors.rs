// src/errors.rs

//! Crate-wide error types.
//!
//! - [`TaskError`] is the terminal error stored in a settled
//!   [`AppFuture`](crate::future::AppFuture). Every dependant of a failed task
//!   observes the same error, so it is cheap to clone.
//! - [`KernelError`] covers operational failures: configuration, IO, template
//!   rendering and internal invariant violations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::TaskId;

/// Why a task's future failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// An input never produced a value. Never retried.
    #[error("task {task} not run: dependency {dependency} failed ({cause})")]
    DependencyFailed {
        task: TaskId,
        dependency: TaskId,
        cause: Arc<TaskError>,
    },

    /// The command or closure raised / exited non-zero.
    #[error("task {task} execution failed: {message}")]
    ExecutionFailed {
        task: TaskId,
        message: String,
        exit_code: Option<i32>,
    },

    /// The job exceeded its walltime budget (including time spent held).
    #[error("task {task} exceeded walltime of {walltime:?}")]
    JobTimeout {
        task: TaskId,
        job: Option<String>,
        walltime: Duration,
    },

    /// The scheduler kept the job in a held state for too long.
    #[error("task {task}: job {job} held for {held_for:?}")]
    JobHeld {
        task: TaskId,
        job: String,
        held_for: Duration,
    },

    /// Transport-level failure talking to the execution target.
    #[error("channel error: {0}")]
    Channel(String),

    /// A declared output could not be staged back, even if the command succeeded.
    #[error("task {task}: staging output '{output}' failed: {reason}")]
    OutputStagingFailed {
        task: TaskId,
        output: String,
        reason: String,
    },

    #[error("task {task} was cancelled")]
    Cancelled { task: TaskId },

    #[error("task {task} abandoned: kernel shut down")]
    KernelShutdown { task: TaskId },

    /// The kernel runs fail-fast and task `failed` failed terminally.
    #[error("task {task} aborted: task {failed} failed")]
    RunAborted { task: TaskId, failed: TaskId },
}

impl TaskError {
    /// Whether the retry policy may re-dispatch a task that failed with this error.
    ///
    /// Only failures reported by an executor are retryable; graph-level
    /// outcomes (dependency failure, cancellation, shutdown, fail-fast abort)
    /// are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::ExecutionFailed { .. }
                | TaskError::JobTimeout { .. }
                | TaskError::JobHeld { .. }
                | TaskError::Channel(_)
                | TaskError::OutputStagingFailed { .. }
        )
    }

    /// Short stable label, used in logs and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::DependencyFailed { .. } => "dependency_failed",
            TaskError::ExecutionFailed { .. } => "execution_failed",
            TaskError::JobTimeout { .. } => "job_timeout",
            TaskError::JobHeld { .. } => "job_held",
            TaskError::Channel(_) => "channel_error",
            TaskError::OutputStagingFailed { .. } => "output_staging_failed",
            TaskError::Cancelled { .. } => "cancelled",
            TaskError::KernelShutdown { .. } => "kernel_shutdown",
            TaskError::RunAborted { .. } => "run_aborted",
        }
    }

    /// Convenience constructor for the common executor failure.
    pub fn execution(task: TaskId, message: impl Into<String>) -> Self {
        TaskError::ExecutionFailed {
            task,
            message: message.into(),
            exit_code: None,
        }
    }
}

/// Transport-level failure of a [`Channel`](crate::channel::Channel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to run '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// The connection itself failed; the session is torn down and reopened
    /// on next use.
    #[error("connection to {host} failed: {message}")]
    Transport { host: String, message: String },

    #[error("copying {from} to {to} failed: {message}")]
    Transfer {
        from: String,
        to: String,
        message: String,
    },

    #[error("channel IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e.to_string())
    }
}

impl From<ChannelError> for TaskError {
    fn from(e: ChannelError) -> Self {
        TaskError::Channel(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum KernelError {
    /// A future was resolved or failed twice.
    #[error("future of task {0} is already settled")]
    AlreadySettled(TaskId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    /// The kernel event loop is gone (after shutdown, or if it panicked).
    #[error("kernel is not running")]
    KernelStopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, KernelError>;
