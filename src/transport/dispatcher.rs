//! Backend chain with the dispatch loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use super::capabilities::Capabilities;
use super::constants::{DEFAULT_TIMEOUT, MAX_DISPATCH_ATTEMPTS};
use super::fetch::FetchBackend;
use super::legacy::LegacyBackend;
use super::privileged::{PrivilegedBackend, PrivilegedHost};
use super::request::RequestDescriptor;
use super::response::Response;
use super::xhr::EmulatedXhrApi;
use super::{AbortFn, Backend, BackendKind, PreparedRequest};
use crate::config::TransportConfig;
use crate::error::BackendError;
use crate::operation::CancelableOperation;
use crate::user_agent;

/// Resolves a possibly-relative URL against the page location.
///
/// # Errors
///
/// Returns [`BackendError::InvalidUrl`] when the URL cannot be joined.
pub fn resolve_url(location: &Url, raw: &str) -> Result<Url, BackendError> {
    location
        .join(raw)
        .map_err(|_| BackendError::InvalidUrl {
            url: raw.to_string(),
        })
}

/// Builds the reqwest client shared by the fetch and emulated legacy transports.
///
/// # Errors
///
/// Returns [`BackendError::Construct`] when the client cannot be built.
pub fn build_http_client(config: &TransportConfig) -> Result<Client, BackendError> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(user_agent::default_user_agent);
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .user_agent(user_agent)
        .build()
        .map_err(|error| BackendError::construct(BackendKind::Fetch, error.to_string()))
}

/// Builds the default transport: reqwest fetch, the optional privileged host,
/// and the reqwest-emulated legacy fallback.
///
/// # Errors
///
/// Returns [`BackendError`] when the HTTP client cannot be built.
pub fn build_default_transport(
    config: &TransportConfig,
    privileged_host: Option<Arc<dyn PrivilegedHost>>,
) -> Result<Transport, BackendError> {
    let client = build_http_client(config)?;
    let mut transport = Transport::new(config.location.clone(), config.capabilities())
        .with_timeout(config.timeout);

    transport.register(Box::new(FetchBackend::new(
        client.clone(),
        config.location.clone(),
        config.document_referrer.clone(),
    )));
    if let Some(host) = privileged_host {
        transport.register(Box::new(PrivilegedBackend::new(host)));
    }
    transport.register(Box::new(LegacyBackend::new(Arc::new(EmulatedXhrApi::new(
        client,
    )))));

    debug!(?transport, "transport ready");
    Ok(transport)
}

/// A priority-ordered chain of backends with the dispatch loop.
///
/// Backends are kept sorted by [`BackendKind`]; within one kind,
/// registration order is preserved.
pub struct Transport {
    backends: Vec<Box<dyn Backend>>,
    capabilities: Arc<Capabilities>,
    location: Url,
    timeout: Duration,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.backends.iter().map(|b| b.kind().as_str()).collect();
        f.debug_struct("Transport")
            .field("backends", &kinds)
            .field("capabilities", &self.capabilities)
            .field("location", &self.location.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Transport {
    /// Creates a transport with no backends and the default timeout window.
    #[must_use]
    pub fn new(location: Url, capabilities: Capabilities) -> Self {
        Self {
            backends: Vec::new(),
            capabilities: Arc::new(capabilities),
            location,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout window used by requests that opt in.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a backend at its priority position.
    #[instrument(skip_all, fields(backend = %backend.kind()))]
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        let position = self
            .backends
            .iter()
            .position(|existing| existing.kind() > backend.kind())
            .unwrap_or(self.backends.len());
        debug!(position, "registering backend");
        self.backends.insert(position, backend);
    }

    /// Number of registered backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Environment capability flags.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Page location relative URLs are resolved against.
    #[must_use]
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Timeout window applied to requests that opt in.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// First backend eligible for the request, if any.
    #[must_use]
    pub fn find_backend(&self, request: &RequestDescriptor) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .map(|backend| &**backend)
            .find(|backend| backend.is_eligible(request, &self.capabilities))
    }

    /// Issues a GET with no extra headers and no timeout.
    pub fn get(&self, url: impl Into<String>) -> CancelableOperation<Response> {
        self.request(RequestDescriptor::get(url))
    }

    /// Issues a request through the first eligible backend.
    ///
    /// Never fails synchronously: URL resolution errors, missing backends
    /// and backend start failures come back as a rejected operation carrying
    /// a code-0 [`TransportError`](crate::TransportError).
    #[instrument(
        skip(self, request),
        fields(url = %request.url, method = %request.method, cross_origin = request.cross_origin)
    )]
    pub fn request(&self, request: RequestDescriptor) -> CancelableOperation<Response> {
        let url = match resolve_url(&self.location, &request.url) {
            Ok(url) => url,
            Err(error) => return CancelableOperation::rejected(error.into()),
        };
        let prepared = PreparedRequest {
            timeout: request.use_timeout.then_some(self.timeout),
            descriptor: Arc::new(request),
            url,
        };

        let mut last_error = None;
        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let Some(backend) = self.find_backend(&prepared.descriptor) else {
                break;
            };
            debug!(backend = %backend.kind(), attempt, "dispatching request");

            let mut failure = None;
            let operation = CancelableOperation::new(|settle| {
                match backend.start(&prepared, settle) {
                    Ok(abort) => abort,
                    Err(error) => {
                        failure = Some(error);
                        let noop: AbortFn = Box::new(|| {});
                        noop
                    }
                }
            });
            let Some(error) = failure else {
                return operation;
            };

            if backend.kind() == BackendKind::Legacy && error.is_construction_failure() {
                warn!(
                    error = %error,
                    attempt,
                    "legacy transport failed to construct; re-dispatching"
                );
                self.capabilities.disable_native_legacy();
                last_error = Some(error);
                continue;
            }

            debug!(backend = %backend.kind(), error = %error, "backend failed to start");
            return CancelableOperation::rejected(error.into());
        }

        let error = last_error.unwrap_or_else(|| BackendError::Unavailable {
            url: prepared.url.to_string(),
        });
        CancelableOperation::rejected(error.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::TransportError;
    use crate::operation::Settle;

    /// Backend that resolves immediately with its own kind in the status text.
    struct Scripted {
        kind: BackendKind,
        eligible: bool,
        construct_failures: AtomicUsize,
        starts: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                eligible: true,
                construct_failures: AtomicUsize::new(0),
                starts: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn ineligible(mut self) -> Self {
            self.eligible = false;
            self
        }

        fn failing(self, times: usize) -> Self {
            self.construct_failures.store(times, Ordering::SeqCst);
            self
        }
    }

    impl Backend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn is_eligible(&self, request: &RequestDescriptor, capabilities: &Capabilities) -> bool {
            match self.kind {
                BackendKind::Privileged => {
                    self.eligible && (request.cross_origin || !capabilities.native_legacy())
                }
                _ => self.eligible,
            }
        }

        fn start(
            &self,
            prepared: &PreparedRequest,
            settle: Settle<Response>,
        ) -> Result<AbortFn, BackendError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.construct_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.construct_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(BackendError::construct(self.kind, "blocked"));
            }
            settle.resolve(Response::new(200, self.kind.as_str(), prepared.url.as_str()));
            Ok(Box::new(|| {}))
        }
    }

    fn transport(backends: Vec<Scripted>) -> Transport {
        let mut transport = Transport::new(
            Url::parse("https://board.example/b/").unwrap(),
            Capabilities::default(),
        );
        for backend in backends {
            transport.register(Box::new(backend));
        }
        transport
    }

    #[test]
    fn test_resolve_url_joins_relative_paths() {
        let location = Url::parse("https://board.example/b/res/1.html").unwrap();
        assert_eq!(
            resolve_url(&location, "2.html").unwrap().as_str(),
            "https://board.example/b/res/2.html"
        );
        assert_eq!(
            resolve_url(&location, "/api/thread.json").unwrap().as_str(),
            "https://board.example/api/thread.json"
        );
        assert_eq!(
            resolve_url(&location, "https://cdn.example/x").unwrap().as_str(),
            "https://cdn.example/x"
        );
    }

    #[test]
    fn test_register_sorts_by_priority() {
        let transport = transport(vec![
            Scripted::new(BackendKind::Legacy),
            Scripted::new(BackendKind::Fetch),
            Scripted::new(BackendKind::Privileged),
        ]);
        assert_eq!(transport.backend_count(), 3);
        let chosen = transport.find_backend(&RequestDescriptor::get("/")).unwrap();
        assert_eq!(chosen.kind(), BackendKind::Fetch);
    }

    #[tokio::test]
    async fn test_fetch_ineligible_falls_to_legacy_for_same_origin() {
        let transport = transport(vec![
            Scripted::new(BackendKind::Fetch).ineligible(),
            Scripted::new(BackendKind::Privileged),
            Scripted::new(BackendKind::Legacy),
        ]);
        let response = transport.get("res/1.html").await.unwrap();
        assert_eq!(response.status_text(), "legacy");
        assert_eq!(response.url(), "https://board.example/b/res/1.html");
    }

    #[tokio::test]
    async fn test_cross_origin_prefers_privileged() {
        let transport = transport(vec![
            Scripted::new(BackendKind::Fetch).ineligible(),
            Scripted::new(BackendKind::Privileged),
            Scripted::new(BackendKind::Legacy),
        ]);
        let response = transport
            .request(RequestDescriptor::get("https://cdn.example/x").cross_origin(true))
            .await
            .unwrap();
        assert_eq!(response.status_text(), "privileged");
    }

    #[tokio::test]
    async fn test_legacy_construction_failure_disables_and_redispatches() {
        let transport = transport(vec![
            Scripted::new(BackendKind::Privileged),
            Scripted::new(BackendKind::Legacy).failing(1),
        ]);
        assert!(transport.capabilities().native_legacy());

        let response = transport.get("res/1.html").await.unwrap();

        assert_eq!(response.status_text(), "privileged");
        assert!(!transport.capabilities().native_legacy());
    }

    #[tokio::test]
    async fn test_retry_budget_bounds_repeated_legacy_failures() {
        let legacy = Scripted::new(BackendKind::Legacy).failing(usize::MAX);
        let starts = Arc::clone(&legacy.starts);
        let transport = transport(vec![legacy]);

        let error = transport.get("res/1.html").await.unwrap_err();

        assert_eq!(error.code(), 0);
        assert!(error.to_string().contains("blocked"));
        assert_eq!(
            starts.load(Ordering::SeqCst),
            usize::try_from(MAX_DISPATCH_ATTEMPTS).unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_backend_rejects_with_code_zero() {
        let transport = transport(vec![Scripted::new(BackendKind::Fetch).ineligible()]);
        let error = transport.get("res/1.html").await.unwrap_err();
        assert_eq!(error.code(), 0);
        assert!(error.to_string().contains("no transport backend"));
    }

    #[tokio::test]
    async fn test_unresolvable_url_rejects() {
        let transport = Transport::new(
            Url::parse("https://board.example/").unwrap(),
            Capabilities::default(),
        );
        let error = transport.get("http://[::1").await.unwrap_err();
        assert_eq!(error.code(), 0);
        assert_ne!(error, TransportError::TIMEOUT);
    }
}
