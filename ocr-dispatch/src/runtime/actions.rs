use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::WorkerError;
use crate::job::{JobId, Payload};

use super::worker::{WorkOutput, Worker, WorkerId};

type ActionFn = Arc<
    dyn Fn(Payload, JobId) -> BoxFuture<'static, Result<WorkOutput, WorkerError>>
        + Send
        + Sync,
>;

type TerminateFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), WorkerError>> + Send + Sync>;

/// Worker backed by a table of named async handlers.
///
/// Useful for binding an engine adapter without writing a [`Worker`] impl by
/// hand. Invoking a name that was never registered yields
/// [`WorkerError::UnknownAction`].
///
/// # Example
///
/// ```ignore
/// let worker = ActionWorker::builder("tesseract-0")
///     .action("recognize", |payload, job_id| async move {
///         let text = engine.recognize(&payload).await?;
///         Ok(WorkOutput::Single(json!({ "job": job_id, "text": text })))
///     })
///     .on_terminate(|| async { Ok(()) })
///     .build();
/// ```
pub struct ActionWorker {
    id: WorkerId,
    actions: HashMap<String, ActionFn>,
    on_terminate: Option<TerminateFn>,
}

impl ActionWorker {
    pub fn builder(id: impl Into<WorkerId>) -> ActionWorkerBuilder {
        ActionWorkerBuilder {
            id: id.into(),
            actions: HashMap::new(),
            on_terminate: None,
        }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ActionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionWorker")
            .field("id", &self.id)
            .field("actions", &self.actions())
            .field("on_terminate_set", &self.on_terminate.is_some())
            .finish()
    }
}

#[async_trait]
impl Worker for ActionWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn invoke(
        &self,
        action: &str,
        payload: Payload,
        job_id: &JobId,
    ) -> Result<WorkOutput, WorkerError> {
        let handler = self.actions.get(action).ok_or_else(|| {
            WorkerError::UnknownAction {
                worker: self.id.clone(),
                action: action.to_string(),
            }
        })?;
        handler(payload, job_id.clone()).await
    }

    async fn terminate(&self) -> Result<(), WorkerError> {
        match &self.on_terminate {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}

/// Builder for [`ActionWorker`].
pub struct ActionWorkerBuilder {
    id: WorkerId,
    actions: HashMap<String, ActionFn>,
    on_terminate: Option<TerminateFn>,
}

impl ActionWorkerBuilder {
    /// Register `handler` under `name`, replacing any earlier handler with
    /// the same name.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Payload, JobId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkOutput, WorkerError>> + Send + 'static,
    {
        let handler: ActionFn = Arc::new(move |payload, job_id| handler(payload, job_id).boxed());
        self.actions.insert(name.into(), handler);
        self
    }

    /// Hook run by [`Worker::terminate`].
    pub fn on_terminate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
    {
        let hook: TerminateFn = Arc::new(move || hook().boxed());
        self.on_terminate = Some(hook);
        self
    }

    pub fn build(self) -> ActionWorker {
        ActionWorker {
            id: self.id,
            actions: self.actions,
            on_terminate: self.on_terminate,
        }
    }
}

impl fmt::Debug for ActionWorkerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionWorkerBuilder")
            .field("id", &self.id)
            .field("action_count", &self.actions.len())
            .field("on_terminate_set", &self.on_terminate.is_some())
            .finish()
    }
}
