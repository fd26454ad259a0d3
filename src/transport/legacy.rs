//! Legacy synchronous-construct transport (the fallback).
//!
//! The native request object is built step by step: construct, register the
//! ready-state handler and upload progress, open, set response type and
//! headers, send. A failure in any of those steps is reported as a
//! construction failure, which makes the dispatcher disable this transport
//! for the rest of the process and retry once.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use tokio::runtime::Handle;
use tracing::instrument;
use url::Url;

use super::capabilities::Capabilities;
use super::ready_state::{NativeAbort, ReadyStateCallback, ReadyStateDriver};
use super::request::{ProgressFn, RequestDescriptor, ResponseType};
use super::response::Response;
use super::{AbortFn, Backend, BackendKind, PreparedRequest};
use crate::error::BackendError;
use crate::operation::Settle;

/// Factory for native request objects.
pub trait LegacyApi: Send + Sync {
    /// Constructs a fresh, unopened request object.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Construct`] when the environment forbids it.
    fn create(&self) -> Result<Box<dyn LegacyRequest>, BackendError>;
}

/// A native request object, configured step by step and then sent.
///
/// Implementations report failures of `open`, `set_*` and `send` as
/// [`BackendError::Open`] (or [`BackendError::Construct`]).
pub trait LegacyRequest: Send {
    /// Registers the ready-state handler.
    fn set_ready_state_handler(&mut self, handler: ReadyStateCallback);

    /// Registers the upload progress hook.
    fn set_upload_progress(&mut self, progress: ProgressFn);

    /// Opens the request.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request cannot be opened.
    fn open(&mut self, method: &Method, url: &Url) -> Result<(), BackendError>;

    /// Sets a non-default response type.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the type is unsupported.
    fn set_response_type(&mut self, response_type: ResponseType) -> Result<(), BackendError>;

    /// Sets a request header.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the header is rejected.
    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), BackendError>;

    /// Sends the request and returns its abort handle.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request cannot be sent.
    fn send(self: Box<Self>, body: Option<Vec<u8>>) -> Result<Arc<dyn NativeAbort>, BackendError>;
}

/// Backend wrapping a [`LegacyApi`]. Always eligible: it is the last resort.
pub struct LegacyBackend {
    api: Arc<dyn LegacyApi>,
}

impl fmt::Debug for LegacyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyBackend").finish_non_exhaustive()
    }
}

impl LegacyBackend {
    /// Wraps a native request factory.
    #[must_use]
    pub fn new(api: Arc<dyn LegacyApi>) -> Self {
        Self { api }
    }
}

impl Backend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn is_eligible(&self, _request: &RequestDescriptor, _capabilities: &Capabilities) -> bool {
        true
    }

    #[instrument(level = "debug", skip_all, fields(url = %prepared.url))]
    fn start(
        &self,
        prepared: &PreparedRequest,
        settle: Settle<Response>,
    ) -> Result<AbortFn, BackendError> {
        let runtime = Handle::try_current().map_err(|_| BackendError::NoRuntime {
            backend: BackendKind::Legacy,
        })?;
        let driver = ReadyStateDriver::new(BackendKind::Legacy, settle, prepared.timeout, runtime);
        driver.arm();

        match configure_and_send(self.api.as_ref(), prepared, driver.callback()) {
            Ok(native) => {
                driver.attach_native(native);
                Ok(driver.abort_fn())
            }
            Err(error) => {
                driver.disarm();
                Err(error)
            }
        }
    }
}

fn configure_and_send(
    api: &dyn LegacyApi,
    prepared: &PreparedRequest,
    handler: ReadyStateCallback,
) -> Result<Arc<dyn NativeAbort>, BackendError> {
    let descriptor = &prepared.descriptor;
    let mut request = api.create()?;
    if let Some(progress) = &descriptor.on_progress {
        request.set_upload_progress(Arc::clone(progress));
    }
    request.set_ready_state_handler(handler);
    request.open(&descriptor.method, &prepared.url)?;
    if descriptor.response_type != ResponseType::Text {
        request.set_response_type(descriptor.response_type)?;
    }
    for (name, value) in &descriptor.headers {
        request.set_request_header(name, value)?;
    }
    request.send(descriptor.body.clone())
}
