//! Cancelable, settle-once operations.
//!
//! [`CancelableOperation`] is the result type of every request in this crate.
//! It is a future that resolves or rejects exactly once and carries a
//! [`CancelHandle`] whose cancellation is distinct from rejection:
//!
//! - cancelling before settlement rejects with [`TransportError::TIMEOUT`]
//!   and runs the backend's native abort
//! - cancelling after settlement does nothing
//! - operations chained with [`CancelableOperation::then`] share the source's
//!   handle, so cancelling the tail cancels the source and whatever follow-up
//!   operation a continuation produced
//!
//! # Example
//!
//! ```
//! use pagefetch::{CancelableOperation, TransportError};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let op = CancelableOperation::new(|settle| {
//!     settle.resolve(21);
//!     || {}
//! });
//! let doubled = op.map(|value| value * 2);
//! assert_eq!(doubled.await, Ok(42));
//!
//! let mut backend_side = None;
//! let pending: CancelableOperation<u32> = CancelableOperation::new(|settle| {
//!     backend_side = Some(settle);
//!     || {}
//! });
//! pending.cancel();
//! assert_eq!(pending.await, Err(TransportError::TIMEOUT));
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::TransportError;

type Outcome<T> = Result<T, TransportError>;
type SenderSlot<T> = Mutex<Option<oneshot::Sender<Outcome<T>>>>;
type CancelAction = Box<dyn FnOnce() + Send>;

/// Settlement side of a [`CancelableOperation`].
///
/// Clones share one slot; whichever call settles first wins and every later
/// call returns `false`. Backends hand clones to timers and completion
/// callbacks freely because of this guard.
pub struct Settle<T> {
    slot: Arc<SenderSlot<T>>,
}

impl<T> Clone for Settle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Settle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Settle<T> {
    fn new(sender: oneshot::Sender<Outcome<T>>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Resolves with a value. Returns whether this call settled the operation.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects with an error. Returns whether this call settled the operation.
    pub fn reject(&self, error: TransportError) -> bool {
        self.settle(Err(error))
    }

    /// Settles with an outcome. Returns whether this call settled the operation.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                // A dropped receiver still counts as settled.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Returns true once any clone has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn downgrade(&self) -> Weak<SenderSlot<T>> {
        Arc::downgrade(&self.slot)
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    actions: Vec<CancelAction>,
}

/// Shared cancellation switch for an operation and everything chained onto it.
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    /// Creates a handle with no registered actions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action to run on cancellation.
    ///
    /// Runs immediately if the handle is already cancelled.
    pub fn on_cancel(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.cancelled {
            drop(state);
            action();
        } else {
            state.actions.push(Box::new(action));
        }
    }

    /// Cancels. Only the first call runs the registered actions.
    pub fn cancel(&self) {
        let actions = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.actions)
        };
        // Actions run outside the lock: they may settle operations whose
        // continuations register further actions on this handle.
        for action in actions {
            action();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancelled
    }

    fn forward_to(&self, downstream: &CancelHandle) {
        let downstream = downstream.clone();
        self.on_cancel(move || downstream.cancel());
    }
}

/// A future-like handle that settles at most once and can be cancelled.
#[must_use = "operations do nothing observable unless awaited or cancelled"]
pub struct CancelableOperation<T> {
    future: BoxFuture<'static, Outcome<T>>,
    cancel: CancelHandle,
}

impl<T> fmt::Debug for CancelableOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableOperation")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> CancelableOperation<T> {
    /// Creates an operation from an executor.
    ///
    /// The executor runs synchronously with the settlement handle and returns
    /// the native abort action. The abort runs only if cancellation wins the
    /// settlement race. If every [`Settle`] clone is dropped unsettled, the
    /// operation rejects with [`TransportError::no_connection`].
    pub fn new<E, A>(executor: E) -> Self
    where
        E: FnOnce(Settle<T>) -> A,
        A: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let settle = Settle::new(sender);
        let weak = settle.downgrade();
        let abort = executor(settle);

        let cancel = CancelHandle::new();
        cancel.on_cancel(move || {
            let Some(slot) = weak.upgrade() else {
                return;
            };
            if (Settle { slot }).reject(TransportError::TIMEOUT) {
                abort();
            }
        });

        let future = async move {
            // Every settle clone dropped without settling.
            receiver
                .await
                .unwrap_or_else(|_| Err(TransportError::no_connection()))
        }
        .boxed();

        Self { future, cancel }
    }

    /// Creates an already-resolved operation.
    pub fn resolved(value: T) -> Self {
        Self {
            future: futures_util::future::ready(Ok(value)).boxed(),
            cancel: CancelHandle::new(),
        }
    }

    /// Creates an already-rejected operation, for use inside chains.
    pub fn rejected(error: TransportError) -> Self {
        Self {
            future: futures_util::future::ready(Err(error)).boxed(),
            cancel: CancelHandle::new(),
        }
    }

    /// Chains continuations for both outcomes.
    ///
    /// The returned operation shares this operation's cancel handle, and any
    /// operation returned by a continuation is cancelled along with it. Once
    /// cancelled, the chain never resolves successfully, even if a
    /// continuation would have recovered from the cancellation error.
    pub fn then<U, F, G>(self, on_ok: F, on_err: G) -> CancelableOperation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> CancelableOperation<U> + Send + 'static,
        G: FnOnce(TransportError) -> CancelableOperation<U> + Send + 'static,
    {
        let Self { future, cancel } = self;
        let upstream = cancel.clone();
        let future = async move {
            let outcome = future.await;
            if upstream.is_cancelled() {
                return Err(TransportError::TIMEOUT);
            }
            let next = match outcome {
                Ok(value) => on_ok(value),
                Err(error) => on_err(error),
            };
            upstream.forward_to(&next.cancel);
            let outcome = next.future.await;
            if upstream.is_cancelled() {
                return Err(TransportError::TIMEOUT);
            }
            outcome
        }
        .boxed();
        CancelableOperation { future, cancel }
    }

    /// Chains a continuation on success only; errors pass through unchanged.
    pub fn and_then<U, F>(self, on_ok: F) -> CancelableOperation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> CancelableOperation<U> + Send + 'static,
    {
        self.then(on_ok, CancelableOperation::rejected)
    }

    /// Maps the success value.
    pub fn map<U, F>(self, f: F) -> CancelableOperation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(|value| CancelableOperation::resolved(f(value)))
    }
}

impl<T> CancelableOperation<T> {
    /// Cancels the operation (and its upstream chain).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that can cancel the operation while it is being awaited.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl<T> Future for CancelableOperation<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}
