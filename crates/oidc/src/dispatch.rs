//! Asynchronous request dispatch with cooperative cancellation
//!
//! Network-bound work runs off the caller's context on a tokio runtime.
//! Every dispatched operation resolves to exactly one terminal [`Outcome`]:
//! success, error, or cancelled. A cancelled operation suppresses any
//! result that would have arrived afterwards; an already-delivered outcome
//! is never retracted.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Terminal result of a dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The operation completed and produced a value.
    Success(T),
    /// The operation completed with an error.
    Error(E),
    /// The operation was cancelled before completing.
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    /// Whether this outcome is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Collapse into a `Result`, mapping cancellation to the given error.
    ///
    /// # Errors
    /// Returns the operation's error, or `cancelled` for a cancelled
    /// outcome.
    pub fn into_result(self, cancelled: E) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error(err) => Err(err),
            Self::Cancelled => Err(cancelled),
        }
    }
}

/// Dispatcher executing operations on a tokio runtime.
///
/// Cancellation tokens handed to operations are children of a dispatcher
/// root token, so [`RequestDispatcher::shutdown`] cancels everything
/// in flight at once.
#[derive(Debug)]
pub struct RequestDispatcher {
    handle: Option<Handle>,
    root: CancellationToken,
}

impl RequestDispatcher {
    /// Create a dispatcher that spawns onto the ambient runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: None,
            root: CancellationToken::new(),
        }
    }

    /// Create a dispatcher that spawns onto the given runtime handle.
    #[must_use]
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            root: CancellationToken::new(),
        }
    }

    /// Dispatch a unit of work.
    ///
    /// The returned handle resolves to exactly one [`Outcome`]. Dropping
    /// the handle detaches the work without cancelling it.
    pub fn dispatch<T, E, F>(&self, work: F) -> DispatchHandle<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let token = self.root.child_token();
        let task_token = token.clone();
        let (tx, rx) = oneshot::channel();

        let task = async move {
            let outcome = tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    debug!("dispatched operation cancelled");
                    Outcome::Cancelled
                }
                result = work => match result {
                    Ok(value) => Outcome::Success(value),
                    Err(err) => Outcome::Error(err),
                },
            };
            // The receiver may already be gone; there is nobody to notify
            // then.
            let _ = tx.send(outcome);
        };

        match &self.handle {
            Some(handle) => {
                handle.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }

        DispatchHandle { token, rx }
    }

    /// Cancel every operation dispatched from this dispatcher.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one dispatched operation.
#[derive(Debug)]
pub struct DispatchHandle<T, E> {
    token: CancellationToken,
    rx: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> DispatchHandle<T, E> {
    /// Request cooperative cancellation of the operation.
    ///
    /// If the operation already completed, its outcome stands; cancellation
    /// is never delivered after a success or error.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by the dispatched operation; clone it to wire the
    /// same cancellation into nested work.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Await the terminal outcome.
    pub async fn outcome(self) -> Outcome<T, E> {
        self.rx.await.unwrap_or(Outcome::Cancelled)
    }

    /// Synchronous wrapper: block the calling thread on the one-shot
    /// signal.
    ///
    /// Must not be called from within an async context.
    #[must_use]
    pub fn wait(self) -> Outcome<T, E> {
        self.rx.blocking_recv().unwrap_or(Outcome::Cancelled)
    }
}
