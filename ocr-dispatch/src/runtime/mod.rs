/// Closure-backed workers keyed by action name.
pub mod actions;
/// Builder for constructing schedulers with an initial pool.
pub mod builder;
/// Scheduler dispatching queued jobs onto idle workers.
pub mod scheduler;
/// Worker trait and operation outputs.
pub mod worker;

pub use actions::{ActionWorker, ActionWorkerBuilder};
pub use builder::SchedulerBuilder;
pub use scheduler::{Lifecycle, Scheduler, SchedulerSnapshot, WorkerSnapshot};
pub use worker::{SubResult, WorkOutput, Worker, WorkerId};
