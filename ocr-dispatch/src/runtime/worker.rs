use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WorkerError, panic_message};
use crate::job::{JobId, Payload};

/// Identifier of a registered worker. Must be unique within a scheduler.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A long-lived executor of named recognition operations.
///
/// The scheduler guarantees that `invoke` is never called on a worker while a
/// previous invocation (including every sub-result of a batch output) is
/// still outstanding.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identifier of this worker.
    fn id(&self) -> &WorkerId;

    /// Run the operation named `action` against `payload`.
    async fn invoke(
        &self,
        action: &str,
        payload: Payload,
        job_id: &JobId,
    ) -> Result<WorkOutput, WorkerError>;

    /// Release the worker's underlying resources (engine processes, sockets).
    async fn terminate(&self) -> Result<(), WorkerError>;
}

/// Value produced by a worker operation.
#[derive(Clone, Debug)]
pub enum WorkOutput {
    /// A single, fully settled result.
    Single(Value),
    /// Results that are still being produced, e.g. one page per entry of a
    /// multi-page recognition. The worker stays busy until every entry has
    /// settled.
    Batch(Vec<SubResult>),
}

impl WorkOutput {
    pub fn is_batch(&self) -> bool {
        matches!(self, WorkOutput::Batch(_))
    }

    pub fn batch_len(&self) -> Option<usize> {
        match self {
            WorkOutput::Batch(parts) => Some(parts.len()),
            WorkOutput::Single(_) => None,
        }
    }

    pub fn into_single(self) -> Option<Value> {
        match self {
            WorkOutput::Single(value) => Some(value),
            WorkOutput::Batch(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<Vec<SubResult>> {
        match self {
            WorkOutput::Batch(parts) => Some(parts),
            WorkOutput::Single(_) => None,
        }
    }

    /// Sub-results the worker is still completing; empty for single results.
    pub(crate) fn pending(&self) -> Vec<SubResult> {
        match self {
            WorkOutput::Batch(parts) => parts.clone(),
            WorkOutput::Single(_) => Vec::new(),
        }
    }
}

impl From<Value> for WorkOutput {
    fn from(value: Value) -> Self {
        WorkOutput::Single(value)
    }
}

impl From<Vec<SubResult>> for WorkOutput {
    fn from(parts: Vec<SubResult>) -> Self {
        WorkOutput::Batch(parts)
    }
}

/// One independently settling entry of a batch output.
///
/// Cloning is cheap and every clone observes the same settled value, so the
/// caller can await the entries while the scheduler waits on them too.
#[derive(Clone)]
pub struct SubResult {
    inner: Shared<BoxFuture<'static, Result<Value, WorkerError>>>,
}

impl SubResult {
    /// Wrap a pending entry. A panic while it runs settles the entry with
    /// [`WorkerError::Panicked`] for every clone.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, WorkerError>> + Send + 'static,
    {
        let settled = AssertUnwindSafe(future).catch_unwind().map(|outcome| {
            outcome.unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(&*panic))))
        });
        Self {
            inner: settled.boxed().shared(),
        }
    }

    /// A sub-result that is already settled.
    pub fn ready(result: Result<Value, WorkerError>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// The settled value, if this sub-result has been polled to completion.
    pub fn peek(&self) -> Option<&Result<Value, WorkerError>> {
        self.inner.peek()
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }
}

impl Future for SubResult {
    type Output = Result<Value, WorkerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for SubResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubResult")
            .field("settled", &self.is_settled())
            .finish()
    }
}
