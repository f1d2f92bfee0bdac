use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
};

use futures::FutureExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::media::types::PipelineError;

/// Join-all task group: the first failure is kept and cancels every other
/// task through the shared token.
#[derive(Clone)]
pub struct TaskGroup {
    tracker: TaskTracker,
    cancel: CancellationToken,
    first_error: Arc<Mutex<Option<PipelineError>>>,
}

impl TaskGroup {
    /// The group token is a child of `parent`, so cancelling the request
    /// cancels the group but a failing group leaves the request alone.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: parent.child_token(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tasks may spawn further tasks into the group while it is waited on.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let group = self.clone();
        self.tracker.spawn(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Panicked(name)),
            };
            match result {
                Ok(()) => log::trace!("{} finished", name),
                Err(e) => group.fail(name, e),
            }
        });
    }

    fn fail(&self, name: &'static str, err: PipelineError) {
        {
            let mut slot = self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                log::debug!("{} failed first: {}", name, err);
                *slot = Some(err);
            } else {
                log::trace!("{} failed after the group failed: {}", name, err);
            }
        }
        self.cancel.cancel();
    }

    /// Waits for every task, including ones spawned while waiting, and
    /// returns the first recorded failure.
    pub async fn wait(&self) -> Option<PipelineError> {
        self.tracker.close();
        self.tracker.wait().await;
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
