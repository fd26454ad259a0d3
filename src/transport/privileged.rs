//! Privileged script-host transport.
//!
//! The host (a userscript manager or an embedding application) exposes a
//! cross-origin request primitive that reports progress through ready-state
//! callbacks. Two host flavours exist: older hosts return an abort handle,
//! newer ones return nothing and cannot abort at all. With the latter,
//! cancellation still rejects the operation but the request runs to
//! completion in the background.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use url::Url;

use super::capabilities::Capabilities;
use super::ready_state::{NativeAbort, ReadyStateCallback, ReadyStateDriver};
use super::request::{ProgressFn, RequestDescriptor, ResponseType};
use super::response::Response;
use super::{AbortFn, Backend, BackendKind, PreparedRequest};
use crate::error::BackendError;
use crate::operation::Settle;

/// Request details handed to the privileged host.
pub struct HostRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Requested body materialization.
    pub response_type: ResponseType,
    /// Upload progress hook, threaded to the host's native upload progress.
    pub upload_progress: Option<ProgressFn>,
    /// Invoked on every ready-state transition.
    pub on_ready_state_change: ReadyStateCallback,
}

impl fmt::Debug for HostRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("response_type", &self.response_type)
            .field("upload_progress", &self.upload_progress.is_some())
            .finish_non_exhaustive()
    }
}

/// Cross-origin request primitive supplied by the host environment.
pub trait PrivilegedHost: Send + Sync {
    /// Issues a request.
    ///
    /// Returns `Some(handle)` on hosts that can abort, `None` on hosts that
    /// cannot.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the host refuses the request outright.
    fn xml_http_request(
        &self,
        request: HostRequest,
    ) -> Result<Option<Arc<dyn NativeAbort>>, BackendError>;
}

/// Backend wrapping a [`PrivilegedHost`].
pub struct PrivilegedBackend {
    host: Arc<dyn PrivilegedHost>,
}

impl fmt::Debug for PrivilegedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegedBackend").finish_non_exhaustive()
    }
}

impl PrivilegedBackend {
    /// Wraps a host primitive.
    #[must_use]
    pub fn new(host: Arc<dyn PrivilegedHost>) -> Self {
        Self { host }
    }
}

impl Backend for PrivilegedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Privileged
    }

    fn is_eligible(&self, request: &RequestDescriptor, capabilities: &Capabilities) -> bool {
        request.cross_origin || !capabilities.native_legacy()
    }

    #[instrument(level = "debug", skip_all, fields(url = %prepared.url))]
    fn start(
        &self,
        prepared: &PreparedRequest,
        settle: Settle<Response>,
    ) -> Result<AbortFn, BackendError> {
        let runtime = Handle::try_current().map_err(|_| BackendError::NoRuntime {
            backend: BackendKind::Privileged,
        })?;
        let driver = ReadyStateDriver::new(BackendKind::Privileged, settle, prepared.timeout, runtime);
        let descriptor = &prepared.descriptor;
        let request = HostRequest {
            method: descriptor.method.clone(),
            url: prepared.url.clone(),
            headers: descriptor.headers.clone(),
            body: descriptor.body.clone(),
            response_type: descriptor.response_type,
            upload_progress: descriptor.on_progress.clone(),
            on_ready_state_change: driver.callback(),
        };

        driver.arm();
        match self.host.xml_http_request(request) {
            Ok(Some(handle)) => {
                driver.attach_native(handle);
                Ok(driver.abort_fn())
            }
            Ok(None) => {
                debug!("host cannot abort; cancellation will only reject");
                Ok(driver.abort_fn())
            }
            Err(error) => {
                driver.disarm();
                Err(error)
            }
        }
    }
}
