//! ocr-dispatch - Job queue and worker dispatch for document recognition.
//!
//! Runs recognition jobs over a fixed pool of long-lived, stateful workers
//! (engine processes, remote sessions) where each worker handles one job at
//! a time.
//!
//! # Core Concepts
//!
//! - **Job**: A named action plus a JSON payload, optionally flagged as
//!   priority. See [`Job`], [`JobSpec`] and [`JobPriority`].
//!
//! - **Worker**: Anything implementing the [`Worker`] trait. An operation
//!   returns either a single value or a batch of [`SubResult`]s that settle
//!   independently; a worker stays busy until its whole batch has settled.
//!   [`ActionWorker`] builds a worker from named async closures.
//!
//! - **Queue**: The [`DispatchQueue`] keeps waiting jobs in FIFO order, with
//!   priority jobs placed ahead of every waiting non-priority job.
//!
//! - **Scheduler**: The [`Scheduler`] binds the queue head to the first idle
//!   worker whenever a job arrives or a worker frees up, and resolves each
//!   caller's [`JobHandle`] with the worker's outcome.
//!
//! - **Events**: Every state transition is published on an [`EventBus`] as a
//!   [`SchedulerEvent`] for observability.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use ocr_dispatch::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::new("tesseract"))
//!     .with_worker(Arc::new(
//!         ActionWorker::builder("tesseract-0")
//!             .action("recognize", |payload, _job_id| async move {
//!                 Ok(WorkOutput::Single(payload))
//!             })
//!             .build(),
//!     ))
//!     .build()?;
//!
//! let output = scheduler.submit("recognize", json!({ "image": "scan.png" }), false)?.await?;
//! scheduler.terminate().await?;
//! ```

/// Scheduler configuration.
///
/// The `config` module defines [`SchedulerConfig`], deserializable from any
/// serde source.
pub mod config;

/// Error types.
///
/// - [`SchedulerError`] - failures of scheduler operations
/// - [`WorkerError`] - failures reported by a worker operation
/// - [`JobError`] - why a [`JobHandle`] settled without output
pub mod error;

/// Scheduler lifecycle events.
///
/// The `events` module provides [`SchedulerEvent`], its
/// [`SchedulerEventPayload`] and the broadcast-based [`EventBus`].
pub mod events;

/// Handles resolving to a job's outcome.
pub mod handle;

/// Core job definitions.
///
/// - [`Job`] - a queued unit of work
/// - [`JobSpec`] - caller-side description of a job
/// - [`JobId`] - unique job identifier
/// - [`JobPriority`] - normal or high priority
pub mod job;

/// Prometheus collectors, available with the `metrics` feature.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Priority-aware FIFO of waiting jobs.
///
/// The `queue` module provides [`DispatchQueue`] and [`LaneCounts`].
pub mod queue;

/// Runtime dispatch and worker management.
///
/// The `runtime` module provides:
/// - [`Scheduler`] - the dispatcher
/// - [`SchedulerBuilder`] - builder for a scheduler with an initial pool
/// - [`Worker`] - trait implemented by recognition workers
/// - [`WorkOutput`] and [`SubResult`] - operation outputs
/// - [`ActionWorker`] - closure-backed worker
pub mod runtime;

/// Tracing spans and metric recording helpers.
pub mod telemetry;

pub use config::*;
pub use error::*;
pub use events::*;
pub use handle::*;
pub use job::*;
pub use queue::*;
pub use runtime::*;
