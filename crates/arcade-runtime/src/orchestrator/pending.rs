//! Asynchronous operation results.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::errors::OrchestratorError;

pub(crate) type Resolver<T> = oneshot::Sender<Result<T, OrchestratorError>>;

/// Result of a `start` or `stop`, resolved by a later tick.
///
/// Take it once: poll with [`try_take`](Self::try_take) from the affinity
/// thread, or `.await` it from an async task.
#[must_use = "the outcome of the operation is only visible through this handle"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, OrchestratorError>>,
}

impl<T> Pending<T> {
    pub(crate) fn channel() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Already-resolved result.
    pub fn ready(result: Result<T, OrchestratorError>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    /// Already-failed result.
    pub fn failed(error: OrchestratorError) -> Self {
        Self::ready(Err(error))
    }

    /// The result, if resolved. A result dropped unresolved becomes
    /// [`OrchestratorError::Abandoned`].
    pub fn try_take(&mut self) -> Option<Result<T, OrchestratorError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(OrchestratorError::Abandoned)),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, OrchestratorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OrchestratorError::Abandoned)))
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}
