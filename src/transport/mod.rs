//! Multi-backend request dispatch.
//!
//! One public entry point, [`Transport::request`], issues an HTTP request
//! through whichever backend the environment allows and normalizes the
//! outcome into a [`CancelableOperation<Response>`].
//!
//! # Architecture
//!
//! - [`Backend`] - capability interface each request mechanism implements
//! - [`Transport`] - priority-ordered backend chain with the dispatch loop
//! - [`FetchBackend`] - native fetch-like transport (reqwest), absolute timeout
//! - [`PrivilegedBackend`] - host-supplied cross-origin primitive, ready-state driven
//! - [`LegacyBackend`] - step-by-step request object, ready-state driven fallback
//! - [`EmulatedXhrApi`] - default reqwest-backed request object for the fallback
//!
//! # Selection policy
//!
//! Backends are tried in [`BackendKind`] order; the first eligible one wins:
//!
//! 1. fetch, when [`Capabilities::can_fetch`] allows the cross-origin mode
//! 2. privileged, when cross-origin access is needed or the native legacy
//!    transport is unusable
//! 3. legacy, always
//!
//! If the legacy transport fails to construct, [`Capabilities`] marks it
//! unusable for the process and the request is dispatched once more.
//!
//! [`CancelableOperation<Response>`]: crate::CancelableOperation

mod capabilities;
pub mod constants;
mod dispatcher;
mod fetch;
mod legacy;
mod privileged;
mod ready_state;
mod request;
mod response;
mod xhr;

pub use capabilities::Capabilities;
pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_TIMEOUT, MAX_DISPATCH_ATTEMPTS};
pub use dispatcher::{Transport, build_default_transport, build_http_client, resolve_url};
pub use fetch::{FetchBackend, select_referrer};
pub use legacy::{LegacyApi, LegacyBackend, LegacyRequest};
pub use privileged::{HostRequest, PrivilegedBackend, PrivilegedHost};
pub use ready_state::{NativeAbort, ReadyState, ReadyStateCallback, ReadyStateEvent};
pub use request::{Progress, ProgressFn, RequestDescriptor, ResponseType};
pub use response::{Body, Response, headers_from_pairs, is_status_ok, parse_raw_headers};
pub use xhr::EmulatedXhrApi;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::BackendError;
use crate::operation::Settle;

/// Native abort action returned by a started backend.
pub type AbortFn = Box<dyn FnOnce() + Send>;

/// The request mechanisms, in selection priority order.
///
/// Derives `Ord` so that `Fetch < Privileged < Legacy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    /// Native fetch-like transport.
    Fetch = 0,
    /// Privileged script-host transport.
    Privileged = 1,
    /// Legacy synchronous-construct transport.
    Legacy = 2,
}

impl BackendKind {
    /// Stable lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Privileged => "privileged",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request ready for a backend: the caller's descriptor plus the resolved
/// absolute URL and the timeout window, if enforced.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The caller's descriptor.
    pub descriptor: Arc<RequestDescriptor>,
    /// Absolute request URL.
    pub url: Url,
    /// Timeout window, when the descriptor opted in.
    pub timeout: Option<Duration>,
}

/// Capability interface implemented by each request mechanism.
///
/// A backend starts a request and wires its completion, error, progress and
/// timeout behaviour into the [`Settle`] handle; the dispatcher owns the
/// resulting operation.
pub trait Backend: Send + Sync {
    /// Which mechanism this is (also its selection priority).
    fn kind(&self) -> BackendKind;

    /// Whether this backend may serve the request in this environment.
    fn is_eligible(&self, request: &RequestDescriptor, capabilities: &Capabilities) -> bool;

    /// Starts the request and returns its native abort action.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be started. A
    /// [`BackendError::is_construction_failure`] from the legacy backend
    /// disables it for the process.
    fn start(
        &self,
        prepared: &PreparedRequest,
        settle: Settle<Response>,
    ) -> Result<AbortFn, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_priority_ordering() {
        assert!(BackendKind::Fetch < BackendKind::Privileged);
        assert!(BackendKind::Privileged < BackendKind::Legacy);
        assert_eq!(BackendKind::Privileged.to_string(), "privileged");
    }
}
