//! # Harness Error Types
//!
//! Two families of errors exist in the harness:
//!
//! - [`PoolError`]: everything a caller of the worker pool or of a task handle
//!   can observe. Cloneable, because a resolved task handle hands the same
//!   outcome to every waiter.
//! - [`RecorderError`]: failures to record an event. These never reach task
//!   logic; recorders are a best-effort side channel.
//!
//! Nothing in the harness retries on error. Scenarios exist to surface a
//! pathology, so every failure is reported as-is.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by the bounded worker pool and its task handles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Submission attempted after shutdown began. Not fatal to the pool.
    #[error("Worker pool is closed to new submissions")]
    PoolClosed,

    /// The task was interrupted by an immediate shutdown, or was dropped from
    /// the queue before it could start.
    #[error("Task cancelled by immediate shutdown")]
    TaskCancelled,

    /// A handle wait elapsed without resolution. The task itself keeps running
    /// (or stays stuck) and is not killed.
    #[error("Handle wait timed out after {0:?}")]
    HandleWaitTimeout(Duration),

    /// The task body returned an application error.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The task body panicked; the worker caught the panic and survived.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// The operating system refused to start a worker thread.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// Workers did not all exit within the shutdown timeout.
    #[error("Workers still running after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// True for the outcomes produced by cancellation rather than by the task.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PoolError::TaskCancelled)
    }
}

/// Errors raised while recording an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Recorder buffer is full (capacity: {capacity})")]
    Full { capacity: usize },
    #[error("Recorder stream consumer has gone away")]
    Disconnected,
    #[error("Recorder I/O error: {0}")]
    Io(String),
    #[error("Failed to serialize event: {0}")]
    Serialize(String),
}
