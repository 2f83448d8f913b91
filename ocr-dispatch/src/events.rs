use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobId, JobPriority};
use crate::runtime::WorkerId;

/// Metadata envelope attached to every scheduler event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    /// Position of the event in the scheduler's transition order. Strictly
    /// increasing per scheduler.
    pub sequence: u64,
    /// Name of the scheduler that emitted the event.
    pub scheduler: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(sequence: u64, scheduler: impl Into<String>) -> Self {
        Self {
            version: 1,
            sequence,
            scheduler: scheduler.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Scheduler lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub meta: EventMeta,
    pub payload: SchedulerEventPayload,
}

/// Event payload emitted for scheduler state transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SchedulerEventPayload {
    /// A worker joined the pool.
    WorkerAdded { worker_id: WorkerId },
    /// A job was admitted to the queue.
    Submitted {
        job_id: JobId,
        action: String,
        priority: JobPriority,
        queue_length: usize,
    },
    /// The queue head was bound to an idle worker.
    Dispatched {
        job_id: JobId,
        action: String,
        worker_id: WorkerId,
    },
    /// The worker operation returned a result. `batch_len` is set when the
    /// result is a batch whose entries may still be settling.
    Completed {
        job_id: JobId,
        worker_id: WorkerId,
        batch_len: Option<usize>,
    },
    /// The worker operation failed.
    Failed {
        job_id: JobId,
        worker_id: WorkerId,
        error: String,
    },
    /// The worker became idle again.
    WorkerReleased { worker_id: WorkerId, job_id: JobId },
    /// A queued job was rejected because the scheduler terminated.
    Rejected { job_id: JobId },
    /// Every worker has been terminated and the queue cleared.
    Terminated { workers: usize, rejected: usize },
}

impl SchedulerEventPayload {
    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            SchedulerEventPayload::Submitted { job_id, .. }
            | SchedulerEventPayload::Dispatched { job_id, .. }
            | SchedulerEventPayload::Completed { job_id, .. }
            | SchedulerEventPayload::Failed { job_id, .. }
            | SchedulerEventPayload::WorkerReleased { job_id, .. }
            | SchedulerEventPayload::Rejected { job_id } => Some(job_id),
            SchedulerEventPayload::WorkerAdded { .. }
            | SchedulerEventPayload::Terminated { .. } => None,
        }
    }
}

/// In-process event bus using a tokio broadcast channel.
///
/// Publishing never blocks; a subscriber that falls more than `capacity`
/// events behind receives `RecvError::Lagged` and skips ahead. Events
/// published while nobody is subscribed are dropped.
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
    capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn publish(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
