use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{Instrument, debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{JobError, SchedulerError, WorkerError, panic_message};
use crate::events::{EventBus, EventMeta, SchedulerEvent, SchedulerEventPayload};
use crate::handle::JobHandle;
use crate::job::{Job, JobId, JobPriority, JobSpec, Payload};
use crate::queue::{DispatchQueue, LaneCounts, QueueEntry};
use crate::telemetry;

use super::worker::{Worker, WorkerId};

/// Coarse scheduler state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Accepting workers and jobs.
    Active,
    /// `terminate()` is waiting for workers to shut down; nothing is admitted
    /// or dispatched.
    Terminating,
    Terminated,
}

struct SchedulerState {
    /// Registration order is the scan order for idle-worker selection.
    workers: Vec<Arc<dyn Worker>>,
    /// Worker id -> job it is running. Absent means idle.
    busy: HashMap<WorkerId, JobId>,
    queue: DispatchQueue,
    lifecycle: Lifecycle,
    last_sequence: u64,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            workers: Vec::new(),
            busy: HashMap::new(),
            queue: DispatchQueue::new(),
            lifecycle: Lifecycle::Active,
            last_sequence: 0,
        }
    }

    fn next_idle_worker(&self) -> Option<Arc<dyn Worker>> {
        self.workers
            .iter()
            .find(|worker| !self.busy.contains_key(worker.id()))
            .cloned()
    }

    fn is_registered(&self, worker_id: &WorkerId) -> bool {
        self.workers.iter().any(|worker| worker.id() == worker_id)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    events: EventBus,
}

impl SchedulerInner {
    /// Publish an event. Called with the state lock held so that sequence
    /// numbers follow the order of state transitions.
    fn emit(&self, state: &mut SchedulerState, payload: SchedulerEventPayload) {
        state.last_sequence += 1;
        self.events.publish(SchedulerEvent {
            meta: EventMeta::new(state.last_sequence, &self.config.name),
            payload,
        });
    }

    /// Pair queue heads with idle workers until one of them runs out.
    fn dispatch(inner: &Arc<Self>) {
        loop {
            let claimed = {
                let mut state = inner.state.lock();
                inner.claim_head(&mut state)
            };
            let Some((worker, entry)) = claimed else {
                return;
            };
            let task_inner = Arc::clone(inner);
            tokio::spawn(Self::execute(task_inner, worker, entry));
        }
    }

    fn claim_head(&self, state: &mut SchedulerState) -> Option<(Arc<dyn Worker>, QueueEntry)> {
        if state.lifecycle != Lifecycle::Active || state.queue.is_empty() {
            return None;
        }
        let worker = state.next_idle_worker()?;
        let entry = state.queue.pop()?;
        let worker_id = worker.id().clone();

        state.busy.insert(worker_id.clone(), entry.job.id.clone());
        let lane = entry.priority();
        telemetry::set_queue_depth(lane.as_str(), state.queue.lane_len(lane));

        debug!(
            scheduler = %self.config.name,
            job_id = %entry.job.id,
            worker_id = %worker_id,
            queue_length = state.queue.len(),
            "job dispatched"
        );
        self.emit(
            state,
            SchedulerEventPayload::Dispatched {
                job_id: entry.job.id.clone(),
                action: entry.job.action.clone(),
                worker_id,
            },
        );
        Some((worker, entry))
    }

    /// Run one job on its worker, settle the caller's handle, then release
    /// the worker once any batch output has fully settled.
    async fn execute(inner: Arc<Self>, worker: Arc<dyn Worker>, entry: QueueEntry) {
        let QueueEntry {
            job,
            responder,
            enqueued_at,
        } = entry;
        let Job {
            id: job_id,
            action,
            payload,
            ..
        } = job;
        let worker_id = worker.id().clone();

        debug!(
            job_id = %job_id,
            worker_id = %worker_id,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "job started"
        );

        let timing = telemetry::record_job_start(&job_id);
        let operation = AssertUnwindSafe(worker.invoke(&action, payload, &job_id)).catch_unwind();
        let outcome = telemetry::instrument_dispatch(&job_id, &action, &worker_id, operation)
            .await
            .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));

        let status = match &outcome {
            Ok(output) if output.is_batch() => "batch",
            Ok(_) => "success",
            Err(_) => "failed",
        };
        telemetry::record_job_end(timing, &action, status);
        telemetry::record_job_completed(&action, status);

        let pending = match &outcome {
            Ok(output) => output.pending(),
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    action = %action,
                    error = %err,
                    "worker operation failed"
                );
                Vec::new()
            }
        };

        {
            let mut state = inner.state.lock();
            let payload = match &outcome {
                Ok(output) => SchedulerEventPayload::Completed {
                    job_id: job_id.clone(),
                    worker_id: worker_id.clone(),
                    batch_len: output.batch_len(),
                },
                Err(err) => SchedulerEventPayload::Failed {
                    job_id: job_id.clone(),
                    worker_id: worker_id.clone(),
                    error: err.to_string(),
                },
            };
            inner.emit(&mut state, payload);
        }

        let _ = responder.send(outcome.map_err(JobError::from));

        if !pending.is_empty() {
            let parts = pending.len();
            debug!(
                job_id = %job_id,
                worker_id = %worker_id,
                parts = parts,
                "holding worker until batch settles"
            );
            let failed = join_all(pending)
                .instrument(telemetry::job_complete_span(&job_id, &action, status))
                .await
                .iter()
                .filter(|part| part.is_err())
                .count();
            if failed > 0 {
                warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    failed = failed,
                    parts = parts,
                    "batch settled with failed entries"
                );
            }
        }

        Self::release(&inner, &worker_id, job_id);
    }

    fn release(inner: &Arc<Self>, worker_id: &WorkerId, job_id: JobId) {
        {
            let mut state = inner.state.lock();
            state.busy.remove(worker_id);
            inner.emit(
                &mut state,
                SchedulerEventPayload::WorkerReleased {
                    worker_id: worker_id.clone(),
                    job_id,
                },
            );
        }
        debug!(worker_id = %worker_id, "worker released");
        Self::dispatch(inner);
    }
}

/// Dispatches jobs over a pool of stateful workers.
///
/// Jobs wait in a two-lane FIFO (see [`DispatchQueue`]); every time a job is
/// submitted or a worker becomes idle, the queue head is handed to the first
/// idle worker in registration order. A worker runs at most one job at a
/// time, and a job returning a [`WorkOutput::Batch`](super::WorkOutput::Batch)
/// keeps its worker busy until every batch entry has settled.
///
/// Cloning is cheap; clones share the same pool.
///
/// Worker operations run on spawned tokio tasks, so `submit` and
/// `add_worker` must be called from within a tokio runtime whenever they can
/// trigger a dispatch.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Scheduler");
        debug
            .field("config", &self.inner.config)
            .field("events", &self.inner.events);

        match self.inner.state.try_lock() {
            Some(state) => {
                debug
                    .field("lifecycle", &state.lifecycle)
                    .field("worker_count", &state.workers.len())
                    .field("busy_count", &state.busy.len())
                    .field("queue_length", &state.queue.len());
            }
            None => {
                debug.field("state", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler with no workers.
    pub fn new(config: SchedulerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a worker and let it claim the queue head right away.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DuplicateWorker`] if a worker with the same id is
    /// already registered, [`SchedulerError::Terminated`] once termination
    /// has started.
    pub fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<WorkerId, SchedulerError> {
        let worker_id = worker.id().clone();
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                return Err(SchedulerError::Terminated);
            }
            if state.is_registered(&worker_id) {
                return Err(SchedulerError::DuplicateWorker(worker_id));
            }
            state.workers.push(worker);
            self.inner.emit(
                &mut state,
                SchedulerEventPayload::WorkerAdded {
                    worker_id: worker_id.clone(),
                },
            );
        }

        info!(
            scheduler = %self.inner.config.name,
            worker_id = %worker_id,
            "worker registered"
        );
        SchedulerInner::dispatch(&self.inner);
        Ok(worker_id)
    }

    /// Submit a job invoking `action` with `payload`.
    ///
    /// Returns a handle that settles with the worker's output or error.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NoWorkers`] when no worker is registered (nothing is
    /// queued), [`SchedulerError::Terminated`] once termination has started.
    pub fn submit(
        &self,
        action: impl Into<String>,
        payload: Payload,
        priority: impl Into<JobPriority>,
    ) -> Result<JobHandle, SchedulerError> {
        self.submit_job(
            JobSpec::new(action)
                .with_payload(payload)
                .with_priority(priority),
        )
    }

    /// Submit a fully specified job, e.g. one carrying a caller-chosen id.
    pub fn submit_job(&self, spec: JobSpec) -> Result<JobHandle, SchedulerError> {
        let (handle, action, lane) = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                return Err(SchedulerError::Terminated);
            }
            if state.workers.is_empty() {
                return Err(SchedulerError::NoWorkers);
            }

            let job = Job::from_spec(spec);
            let (tx, rx) = oneshot::channel();
            let handle = JobHandle::new(job.id.clone(), rx);
            let action = job.action.clone();
            let lane = job.priority;
            let job_id = job.id.clone();

            state.queue.push(QueueEntry::new(job, tx));
            let queue_length = state.queue.len();
            telemetry::set_queue_depth(lane.as_str(), state.queue.lane_len(lane));

            telemetry::job_submit_span(
                &self.inner.config.name,
                &job_id,
                &action,
                lane.as_str(),
            )
            .in_scope(|| debug!(queue_length = queue_length, "job queued"));

            self.inner.emit(
                &mut state,
                SchedulerEventPayload::Submitted {
                    job_id,
                    action: action.clone(),
                    priority: lane,
                    queue_length,
                },
            );
            (handle, action, lane)
        };

        telemetry::record_job_submitted(&action, lane.as_str());
        SchedulerInner::dispatch(&self.inner);
        Ok(handle)
    }

    /// Terminate every worker concurrently, then clear the queue.
    ///
    /// Admission and dispatch stop as soon as this is called. Jobs still
    /// queued once all workers have shut down are rejected with
    /// [`JobError::Terminated`]. Jobs already running finish normally.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Terminated`] if termination already started;
    /// [`SchedulerError::WorkerTermination`] if any worker failed to shut
    /// down (the queue is cleared regardless).
    pub async fn terminate(&self) -> Result<(), SchedulerError> {
        let workers = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Active {
                return Err(SchedulerError::Terminated);
            }
            state.lifecycle = Lifecycle::Terminating;
            state.workers.clone()
        };

        let span = telemetry::terminate_span(&self.inner.config.name, workers.len());
        async move {
            info!("terminating worker pool");

            let results = join_all(workers.iter().map(|worker| async move {
                let outcome = AssertUnwindSafe(worker.terminate())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(WorkerError::Panicked(panic_message(panic.as_ref())))
                    });
                (worker.id().clone(), outcome)
            }))
            .await;

            let failures: Vec<(WorkerId, WorkerError)> = results
                .into_iter()
                .filter_map(|(worker_id, outcome)| {
                    outcome.err().map(|err| (worker_id, err))
                })
                .collect();
            for (worker_id, err) in &failures {
                warn!(worker_id = %worker_id, error = %err, "worker failed to terminate");
            }

            let rejected = {
                let mut state = self.inner.state.lock();
                state.lifecycle = Lifecycle::Terminated;
                let rejected = state.queue.drain();
                for entry in &rejected {
                    self.inner.emit(
                        &mut state,
                        SchedulerEventPayload::Rejected {
                            job_id: entry.job.id.clone(),
                        },
                    );
                }
                self.inner.emit(
                    &mut state,
                    SchedulerEventPayload::Terminated {
                        workers: workers.len(),
                        rejected: rejected.len(),
                    },
                );
                rejected
            };

            telemetry::set_queue_depth(JobPriority::High.as_str(), 0);
            telemetry::set_queue_depth(JobPriority::Normal.as_str(), 0);
            telemetry::record_jobs_rejected(rejected.len());

            let rejected_count = rejected.len();
            for entry in rejected {
                let job_id = entry.job.id.clone();
                entry.settle(Err(JobError::Terminated(job_id)));
            }

            info!(rejected = rejected_count, "worker pool terminated");
            if failures.is_empty() {
                Ok(())
            } else {
                Err(SchedulerError::WorkerTermination { failures })
            }
        }
        .instrument(span)
        .await
    }

    /// Number of jobs waiting for a worker.
    pub fn queue_length(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.inner.state.lock().workers.len()
    }

    /// Number of workers currently running a job (or settling a batch).
    pub fn busy_count(&self) -> usize {
        self.inner.state.lock().busy.len()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    pub fn is_terminated(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminated
    }

    /// Subscribe to lifecycle events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Point-in-time view of the pool and queue.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.inner.state.lock();
        SchedulerSnapshot {
            sampled_at: Utc::now(),
            scheduler: self.inner.config.name.clone(),
            lifecycle: state.lifecycle,
            queued: state.queue.lanes(),
            workers: state
                .workers
                .iter()
                .map(|worker| WorkerSnapshot {
                    id: worker.id().clone(),
                    current_job: state.busy.get(worker.id()).cloned(),
                })
                .collect(),
        }
    }
}

/// Snapshot of scheduler state at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub sampled_at: DateTime<Utc>,
    pub scheduler: String,
    pub lifecycle: Lifecycle,
    pub queued: LaneCounts,
    /// Workers in registration order.
    pub workers: Vec<WorkerSnapshot>,
}

impl SchedulerSnapshot {
    pub fn busy_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|worker| worker.current_job.is_some())
            .count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub current_job: Option<JobId>,
}
