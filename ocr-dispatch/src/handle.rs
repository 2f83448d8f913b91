use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::JobError;
use crate::job::JobId;
use crate::runtime::WorkOutput;

/// Handle returned by [`Scheduler::submit`](crate::Scheduler::submit).
///
/// Awaiting it yields the worker's output or the job's error, independent of
/// when (or on which worker) the job is dispatched. Dropping the handle does
/// not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    rx: oneshot::Receiver<Result<WorkOutput, JobError>>,
}

impl JobHandle {
    pub(crate) fn new(job_id: JobId, rx: oneshot::Receiver<Result<WorkOutput, JobError>>) -> Self {
        Self { job_id, rx }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl Future for JobHandle {
    type Output = Result<WorkOutput, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx).poll(cx).map(|settled| {
            settled.unwrap_or_else(|_| Err(JobError::Abandoned(this.job_id.clone())))
        })
    }
}
