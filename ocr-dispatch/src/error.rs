use std::any::Any;

use thiserror::Error;

use crate::job::JobId;
use crate::runtime::WorkerId;

/// Errors returned synchronously by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `submit` was called while no worker is registered. Nothing was queued.
    #[error("no workers registered; job would never be dispatched")]
    NoWorkers,

    /// The scheduler has been (or is being) terminated.
    #[error("scheduler has been terminated")]
    Terminated,

    #[error("worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    /// One or more workers failed to shut down cleanly. The pending queue has
    /// still been cleared.
    #[error("{} worker(s) failed to terminate", failures.len())]
    WorkerTermination { failures: Vec<(WorkerId, WorkerError)> },
}

/// Failure raised by a worker operation.
///
/// Cloneable so that the settled value of a batch sub-result can be shared
/// between the caller and the scheduler.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkerError {
    #[error("worker {worker} does not support action `{action}`")]
    UnknownAction { worker: WorkerId, action: String },

    #[error("invalid payload for `{action}`: {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("worker operation panicked: {0}")]
    Panicked(String),
}

impl WorkerError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        WorkerError::Failed(message.to_string())
    }

    pub fn invalid_payload(action: impl Into<String>, err: impl std::fmt::Display) -> Self {
        WorkerError::InvalidPayload {
            action: action.into(),
            reason: err.to_string(),
        }
    }
}

/// Error a [`JobHandle`](crate::JobHandle) settles with.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The job was still queued when the scheduler terminated.
    #[error("job {0} was dropped: scheduler terminated before dispatch")]
    Terminated(JobId),

    /// The scheduler went away without settling the job.
    #[error("job {0} was abandoned without a result")]
    Abandoned(JobId),
}

/// Readable message from a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
