use std::fmt;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

use super::scheduler::Scheduler;
use super::worker::Worker;

/// Builder for constructing a [`Scheduler`] with an initial worker pool.
///
/// Workers are registered in the order they are added, which is also the
/// order in which idle workers are picked.
///
/// # Example
///
/// ```ignore
/// use ocr_dispatch::*;
///
/// let scheduler = SchedulerBuilder::new(SchedulerConfig::new("tesseract"))
///     .with_worker(Arc::new(engine_a))
///     .with_worker(Arc::new(engine_b))
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    workers: Vec<Arc<dyn Worker>>,
}

impl fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field(
                "workers",
                &self
                    .workers
                    .iter()
                    .map(|worker| worker.id().as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl SchedulerBuilder {
    /// Create a new builder with the given scheduler configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
        }
    }

    /// Add a worker to the initial pool.
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Add several workers, keeping their iteration order.
    pub fn with_workers<I>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Worker>>,
    {
        self.workers.extend(workers);
        self
    }

    /// Build the scheduler and register every configured worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateWorker`] if two workers share an id.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let scheduler = Scheduler::new(self.config);
        for worker in self.workers {
            scheduler.add_worker(worker)?;
        }
        Ok(scheduler)
    }
}
