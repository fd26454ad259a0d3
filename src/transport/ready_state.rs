//! Ready-state normalization shared by the privileged and legacy transports.
//!
//! Both transports report completion through a callback fired on every
//! ready-state transition. [`ReadyStateDriver`] turns that callback stream
//! into a single settlement:
//!
//! ```text
//! pending ──Progress(*)──▶ pending (timer re-armed) ──Complete──▶ settled
//!    └──────────────── timer fires ────────────────────────────▶ settled (Timeout)
//! ```
//!
//! The timeout is measured as inactivity between transitions: every
//! non-terminal event restarts the window.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::response::{Response, is_status_ok};
use super::{AbortFn, BackendKind};
use crate::error::{BackendError, TransportError};
use crate::operation::Settle;

/// Ready states of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Created, not opened.
    Unsent = 0,
    /// Opened.
    Opened = 1,
    /// Status line and headers received.
    HeadersReceived = 2,
    /// Body is arriving.
    Loading = 3,
    /// Finished, successfully or not.
    Done = 4,
}

/// A ready-state transition reported by a host transport.
#[derive(Debug, Clone)]
pub enum ReadyStateEvent {
    /// A non-terminal transition.
    Progress(ReadyState),
    /// The request finished. Status 0 means it failed without a response.
    Complete(Response),
}

impl ReadyStateEvent {
    /// Ready state this event represents.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        match self {
            Self::Progress(state) => *state,
            Self::Complete(_) => ReadyState::Done,
        }
    }
}

/// Callback a host transport invokes on every ready-state transition.
pub type ReadyStateCallback = Arc<dyn Fn(ReadyStateEvent) + Send + Sync>;

/// Abort capability of an in-flight host request.
pub trait NativeAbort: Send + Sync {
    /// Aborts the request. Failures are logged and ignored by callers.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the host refuses or cannot abort.
    fn abort(&self) -> Result<(), BackendError>;
}

pub(crate) struct ReadyStateDriver {
    backend: BackendKind,
    settle: Settle<Response>,
    window: Option<Duration>,
    runtime: Handle,
    timer: Mutex<Option<JoinHandle<()>>>,
    native: Mutex<Option<Arc<dyn NativeAbort>>>,
}

impl fmt::Debug for ReadyStateDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyStateDriver")
            .field("backend", &self.backend)
            .field("settle", &self.settle)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl ReadyStateDriver {
    pub(crate) fn new(
        backend: BackendKind,
        settle: Settle<Response>,
        window: Option<Duration>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            settle,
            window,
            runtime,
            timer: Mutex::new(None),
            native: Mutex::new(None),
        })
    }

    pub(crate) fn callback(self: &Arc<Self>) -> ReadyStateCallback {
        let driver = Arc::clone(self);
        Arc::new(move |event| driver.on_event(event))
    }

    pub(crate) fn attach_native(&self, native: Arc<dyn NativeAbort>) {
        *self.native.lock().unwrap_or_else(PoisonError::into_inner) = Some(native);
    }

    /// Starts (or restarts) the timeout window, if timeouts are enabled.
    pub(crate) fn arm(self: &Arc<Self>) {
        let Some(window) = self.window else {
            return;
        };
        let driver = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            driver.on_timeout();
        });
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn disarm(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Abort action handed to the operation's cancel handle.
    ///
    /// Holds the driver weakly: only the host's callback and an armed timer
    /// keep it alive, so a host that drops the request unsettled lets the
    /// operation reject instead of hanging.
    pub(crate) fn abort_fn(self: &Arc<Self>) -> AbortFn {
        let driver = Arc::downgrade(self);
        Box::new(move || {
            if let Some(driver) = driver.upgrade() {
                driver.disarm();
                driver.abort_native();
            }
        })
    }

    fn on_event(self: &Arc<Self>, event: ReadyStateEvent) {
        self.disarm();
        match event {
            ReadyStateEvent::Complete(response) => {
                let status = response.status();
                let outcome = if is_status_ok(status) {
                    Ok(response)
                } else {
                    Err(TransportError::new(
                        i32::from(status),
                        response.status_text().to_string(),
                    ))
                };
                if !self.settle.settle(outcome) {
                    trace!(backend = %self.backend, status, "completion after settlement ignored");
                }
            }
            ReadyStateEvent::Progress(state) => {
                if self.window.is_some() && !self.settle.is_settled() {
                    trace!(backend = %self.backend, ?state, "re-arming timeout window");
                    self.arm();
                }
            }
        }
    }

    fn on_timeout(&self) {
        if self.settle.reject(TransportError::TIMEOUT) {
            debug!(backend = %self.backend, "request timed out; aborting");
            self.abort_native();
        }
    }

    fn abort_native(&self) {
        let native = self
            .native
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(native) = native
            && let Err(error) = native.abort()
        {
            debug!(backend = %self.backend, error = %error, "native abort failed; ignoring");
        }
    }
}
