//! Cancellable unit of asynchronous work with an explicit lifecycle.
//!
//! A job moves `Ready -> Executing -> Finished`. All transitions happen under
//! one mutex and `Finished` is absorbing: the first `finish` wins and every
//! later call is ignored, which makes racing completions (a network callback
//! and an explicit cancel both trying to finish) harmless.
//!
//! Cancelling does not finish the job. The execute body receives the job and
//! is expected to watch [`StatefulJob::cancellation_token`] and abort whatever
//! it owns; the job finishes once the body returns.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::CheckError;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Executing,
    Finished,
}

#[derive(Debug)]
struct JobInner<T> {
    state: JobState,
    cancelled: bool,
    outcome: Option<Result<T>>,
}

#[derive(Debug)]
pub struct StatefulJob<T> {
    inner: Mutex<JobInner<T>>,
    cancel: CancellationToken,
    finished: watch::Sender<bool>,
}

impl<T> StatefulJob<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Self::with_token(CancellationToken::new())
    }

    /// Ties the job to an outer token, e.g. one per coordinator run, so a
    /// single cancel reaches every job of the run.
    pub fn with_token(cancel: CancellationToken) -> Arc<Self> {
        let (finished, _) = watch::channel(false);
        Arc::new(Self {
            inner: Mutex::new(JobInner {
                state: JobState::Ready,
                cancelled: false,
                outcome: None,
            }),
            cancel,
            finished,
        })
    }

    fn lock(&self) -> MutexGuard<'_, JobInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled || self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Terminal outcome, `None` until the job has finished.
    pub fn outcome(&self) -> Option<Result<T>> {
        self.lock().outcome.clone()
    }

    pub fn error(&self) -> Option<CheckError> {
        match self.lock().outcome.as_ref() {
            Some(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
        self.cancel.cancel();
    }

    /// Records the outcome and moves to `Finished`. Returns `false` when the
    /// job had already finished, in which case nothing changes.
    pub fn finish(&self, result: Result<T>) -> bool {
        {
            let mut inner = self.lock();
            if inner.state == JobState::Finished {
                trace!("ignoring duplicate finish");
                return false;
            }
            inner.state = JobState::Finished;
            inner.outcome = Some(result);
        }
        self.finished.send_replace(true);
        true
    }

    /// Moves a ready job to `Executing`, or straight to `Finished` when it
    /// was cancelled before starting. Returns whether the body should run.
    fn begin(&self) -> bool {
        let cancelled = {
            let mut inner = self.lock();
            if inner.state != JobState::Ready {
                return false;
            }
            if inner.cancelled || self.cancel.is_cancelled() {
                true
            } else {
                inner.state = JobState::Executing;
                false
            }
        };
        if cancelled {
            self.finish(Err(CheckError::Cancelled));
            return false;
        }
        true
    }

    /// Starts the job on the current runtime. The body runs at most once;
    /// `None` means it was not spawned (already started, or cancelled).
    pub fn start<F, Fut>(self: &Arc<Self>, execute: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.begin() {
            return None;
        }
        let guard = FinishOnDrop(Arc::clone(self));
        let body = execute(Arc::clone(self));
        Some(tokio::spawn(async move {
            let result = body.await;
            guard.0.finish(result);
        }))
    }

    /// Like [`StatefulJob::start`] but drives the body on the caller's task
    /// and returns the terminal outcome.
    pub async fn run<F, Fut>(self: &Arc<Self>, execute: F) -> Result<T>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.begin() {
            let _guard = FinishOnDrop(Arc::clone(self));
            let result = execute(Arc::clone(self)).await;
            self.finish(result);
        }
        self.wait().await
    }

    /// Resolves once the job reaches `Finished`.
    pub async fn wait(&self) -> Result<T> {
        let mut finished = self.finished.subscribe();
        // The sender lives in `self`, so this only returns once finished.
        let _ = finished.wait_for(|done| *done).await;
        self.outcome().unwrap_or(Err(CheckError::Cancelled))
    }
}

/// Finishes the job as cancelled when the future driving its body is
/// dropped before the body returns.
struct FinishOnDrop<T>(Arc<StatefulJob<T>>)
where
    T: Clone + Send + Sync + 'static;

impl<T> Drop for FinishOnDrop<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.0.finish(Err(CheckError::Cancelled)) {
            trace!("job body dropped before finishing");
        }
    }
}
