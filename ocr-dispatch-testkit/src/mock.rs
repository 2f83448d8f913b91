use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ocr_dispatch::*;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, oneshot, watch};

type PartSender = oneshot::Sender<Result<Value, WorkerError>>;

/// How a [`MockWorker`] answers an invocation.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return `{ "worker", "job", "action", "payload" }` immediately.
    Echo,
    /// Fail with `WorkerError::Failed(message)`.
    Fail(String),
    /// Echo once a permit is handed out via [`MockWorker::release`].
    Gated,
    /// Return a batch of `parts` entries that stay pending until settled via
    /// [`MockWorker::settle_next_part`].
    Batch { parts: usize },
    /// Panic inside the operation.
    Panic(String),
}

#[derive(Clone, Debug)]
pub struct InvocationRecord {
    pub job_id: JobId,
    pub action: String,
    pub payload: Value,
}

/// Scripted worker that records every invocation.
///
/// Also tracks whether it was ever invoked while a previous operation (or a
/// batch it returned) was still outstanding.
pub struct MockWorker {
    id: WorkerId,
    behavior: Mutex<MockBehavior>,
    invocations: Mutex<Vec<InvocationRecord>>,
    invocation_count: watch::Sender<usize>,
    gate: Semaphore,
    busy: AtomicBool,
    overlaps: AtomicUsize,
    pending_parts: Mutex<VecDeque<PartSender>>,
    terminations: AtomicUsize,
    terminate_error: Mutex<Option<String>>,
}

impl MockWorker {
    pub fn new(id: impl Into<WorkerId>) -> Arc<Self> {
        Self::with_behavior(id, MockBehavior::Echo)
    }

    pub fn with_behavior(id: impl Into<WorkerId>, behavior: MockBehavior) -> Arc<Self> {
        let (invocation_count, _) = watch::channel(0);
        Arc::new(Self {
            id: id.into(),
            behavior: Mutex::new(behavior),
            invocations: Mutex::new(Vec::new()),
            invocation_count,
            gate: Semaphore::new(0),
            busy: AtomicBool::new(false),
            overlaps: AtomicUsize::new(0),
            pending_parts: Mutex::new(VecDeque::new()),
            terminations: AtomicUsize::new(0),
            terminate_error: Mutex::new(None),
        })
    }

    pub fn gated(id: impl Into<WorkerId>) -> Arc<Self> {
        Self::with_behavior(id, MockBehavior::Gated)
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make `terminate` fail with the given message.
    pub fn fail_terminate(&self, message: impl Into<String>) {
        *self.terminate_error.lock() = Some(message.into());
    }

    /// Let `permits` gated operations finish.
    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn record(&self) -> Vec<InvocationRecord> {
        self.invocations.lock().clone()
    }

    /// Job ids in the order this worker received them.
    pub fn job_order(&self) -> Vec<JobId> {
        self.invocations
            .lock()
            .iter()
            .map(|record| record.job_id.clone())
            .collect()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    pub fn assert_invocation_count_eq(&self, expected: usize) {
        let actual = self.invocation_count();
        assert_eq!(
            actual, expected,
            "Expected {} invocations on {}, got {}",
            expected, self.id, actual
        );
    }

    /// Number of invocations that arrived while the worker was still busy.
    pub fn overlap_count(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Batch entries handed out but not settled yet.
    pub fn pending_parts(&self) -> usize {
        self.pending_parts.lock().len()
    }

    /// Settle the oldest outstanding batch entry with `value`.
    ///
    /// Returns `false` if nothing was pending.
    pub fn settle_next_part(&self, value: Value) -> bool {
        self.settle_next(Ok(value))
    }

    /// Settle the oldest outstanding batch entry with an error.
    pub fn fail_next_part(&self, message: impl Into<String>) -> bool {
        self.settle_next(Err(WorkerError::Failed(message.into())))
    }

    /// Settle every outstanding batch entry with its position in the batch.
    pub fn settle_all_parts(&self) {
        let mut index = 0;
        while self.settle_next_part(json!({ "part": index })) {
            index += 1;
        }
    }

    fn settle_next(&self, result: Result<Value, WorkerError>) -> bool {
        let mut pending = self.pending_parts.lock();
        let Some(sender) = pending.pop_front() else {
            return false;
        };
        if pending.is_empty() {
            self.busy.store(false, Ordering::SeqCst);
        }
        let _ = sender.send(result);
        true
    }

    /// Wait until at least `count` invocations have been recorded.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within five seconds.
    pub async fn wait_for_invocations(&self, count: usize) {
        let mut rx = self.invocation_count.subscribe();
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|seen| *seen >= count),
        )
        .await
        .is_ok_and(|seen| seen.is_ok());
        assert!(
            reached,
            "{} saw {} invocations, expected {}",
            self.id,
            self.invocation_count(),
            count
        );
    }

    fn output(&self, job_id: &JobId, action: &str, payload: Value) -> WorkOutput {
        WorkOutput::Single(json!({
            "worker": self.id.as_str(),
            "job": job_id.as_str(),
            "action": action,
            "payload": payload,
        }))
    }

    fn batch(&self, parts: usize) -> WorkOutput {
        let mut pending = self.pending_parts.lock();
        let entries = (0..parts)
            .map(|_| {
                let (tx, rx) = oneshot::channel();
                pending.push_back(tx);
                SubResult::new(async move {
                    match rx.await {
                        Ok(result) => result,
                        Err(_) => Err(WorkerError::failed("batch entry dropped")),
                    }
                })
            })
            .collect();
        WorkOutput::Batch(entries)
    }
}

impl std::fmt::Debug for MockWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorker")
            .field("id", &self.id)
            .field("behavior", &*self.behavior.lock())
            .field("invocations", &self.invocation_count())
            .finish()
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn invoke(
        &self,
        action: &str,
        payload: Payload,
        job_id: &JobId,
    ) -> Result<WorkOutput, WorkerError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let total = {
            let mut invocations = self.invocations.lock();
            invocations.push(InvocationRecord {
                job_id: job_id.clone(),
                action: action.to_string(),
                payload: payload.clone(),
            });
            invocations.len()
        };
        self.invocation_count.send_replace(total);

        let behavior = self.behavior.lock().clone();
        let result = match behavior {
            MockBehavior::Echo => Ok(self.output(job_id, action, payload)),
            MockBehavior::Fail(message) => Err(WorkerError::Failed(message)),
            MockBehavior::Gated => match self.gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(self.output(job_id, action, payload))
                }
                Err(_) => Err(WorkerError::failed("gate closed")),
            },
            MockBehavior::Batch { parts } if parts > 0 => {
                // Stays busy until the last entry is settled.
                return Ok(self.batch(parts));
            }
            MockBehavior::Batch { .. } => Ok(WorkOutput::Batch(Vec::new())),
            MockBehavior::Panic(message) => {
                self.busy.store(false, Ordering::SeqCst);
                panic!("{message}");
            }
        };

        self.busy.store(false, Ordering::SeqCst);
        result
    }

    async fn terminate(&self) -> Result<(), WorkerError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        match self.terminate_error.lock().clone() {
            Some(message) => Err(WorkerError::Failed(message)),
            None => Ok(()),
        }
    }
}
