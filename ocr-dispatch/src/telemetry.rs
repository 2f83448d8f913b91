//! Tracing and telemetry instrumentation for ocr-dispatch.
//!
//! Helpers for creating tracing spans and recording metrics during the job
//! lifecycle. Every helper works with and without the `metrics` feature; with
//! it enabled the Prometheus collectors in [`crate::metrics`] are updated as
//! well.
//!
//! # Example
//!
//! ```ignore
//! use ocr_dispatch::telemetry::{instrument_dispatch, record_job_start, record_job_end};
//!
//! let timing = record_job_start(job.id.as_str());
//! let result = instrument_dispatch(&job.id, &job.action, worker.id(), fut).await;
//! record_job_end(timing, &job.action, "success");
//! ```

use std::future::Future;
use tracing::{Instrument, Span, info_span};

/// Create a tracing span for job admission.
#[must_use]
pub fn job_submit_span(
    scheduler: impl AsRef<str>,
    job_id: impl AsRef<str>,
    action: impl AsRef<str>,
    lane: impl AsRef<str>,
) -> Span {
    info_span!(
        "ocr_dispatch.submit",
        scheduler = %scheduler.as_ref(),
        job_id = %job_id.as_ref(),
        action = %action.as_ref(),
        lane = %lane.as_ref(),
    )
}

/// Create a tracing span covering one worker operation.
#[must_use]
pub fn job_dispatch_span(
    job_id: impl AsRef<str>,
    action: impl AsRef<str>,
    worker_id: impl AsRef<str>,
) -> Span {
    info_span!(
        "ocr_dispatch.dispatch",
        job_id = %job_id.as_ref(),
        action = %action.as_ref(),
        worker_id = %worker_id.as_ref(),
    )
}

/// Create a tracing span for job completion handling.
///
/// `status` is one of `success`, `batch`, `failed`.
#[must_use]
pub fn job_complete_span(
    job_id: impl AsRef<str>,
    action: impl AsRef<str>,
    status: impl AsRef<str>,
) -> Span {
    info_span!(
        "ocr_dispatch.complete",
        job_id = %job_id.as_ref(),
        action = %action.as_ref(),
        status = %status.as_ref(),
    )
}

/// Create a tracing span for pool termination.
#[must_use]
pub fn terminate_span(scheduler: impl AsRef<str>, workers: usize) -> Span {
    info_span!(
        "ocr_dispatch.terminate",
        scheduler = %scheduler.as_ref(),
        workers = workers,
    )
}

/// Instrument a worker operation with a dispatch span.
pub fn instrument_dispatch<F>(
    job_id: impl AsRef<str>,
    action: impl AsRef<str>,
    worker_id: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = job_dispatch_span(job_id, action, worker_id);
    future.instrument(span)
}

/// Record a job admission.
pub fn record_job_submitted(action: impl AsRef<str>, lane: impl AsRef<str>) {
    tracing::debug!(
        action = %action.as_ref(),
        lane = %lane.as_ref(),
        "job submitted"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_submitted(action.as_ref(), lane.as_ref());
}

/// Record a settled worker operation.
pub fn record_job_completed(action: impl AsRef<str>, status: impl AsRef<str>) {
    tracing::debug!(
        action = %action.as_ref(),
        status = %status.as_ref(),
        "job completed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_completed(action.as_ref(), status.as_ref());
}

/// Record queued jobs rejected at termination.
pub fn record_jobs_rejected(count: usize) {
    if count == 0 {
        return;
    }
    tracing::warn!(count = count, "queued jobs rejected at termination");

    #[cfg(feature = "metrics")]
    crate::metrics::record_jobs_rejected(count as u64);
}

/// Update the queue depth for a lane.
pub fn set_queue_depth(lane: impl AsRef<str>, depth: usize) {
    tracing::trace!(lane = %lane.as_ref(), depth = depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(lane.as_ref(), depth as f64);
}

/// Observe the wall time of a worker operation.
pub fn observe_job_duration(action: impl AsRef<str>, status: impl AsRef<str>, duration_secs: f64) {
    tracing::debug!(
        action = %action.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(action.as_ref(), status.as_ref(), duration_secs);
}

/// Start timing a worker operation. Pass the handle to [`record_job_end`].
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing a worker operation and record its duration.
pub fn record_job_end(handle: JobTimingHandle, action: impl AsRef<str>, status: impl AsRef<str>) {
    observe_job_duration(action, status, handle.start.elapsed().as_secs_f64());
}

/// Opaque timer returned by [`record_job_start`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
