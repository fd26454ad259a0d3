//! Request descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reqwest::Method;

/// How the response body should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Decoded text.
    #[default]
    Text,
    /// Raw bytes.
    ArrayBuffer,
    /// Raw bytes tagged with the response content type.
    Blob,
}

/// Upload progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes sent so far.
    pub loaded: u64,
    /// Total bytes to send, when known.
    pub total: Option<u64>,
}

/// Upload progress callback.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Everything needed to issue one request.
///
/// Built with [`RequestDescriptor::get`] and the chained setters. The
/// transport takes it by value, so it cannot change once dispatch begins.
#[derive(Clone)]
pub struct RequestDescriptor {
    /// Possibly-relative URL, resolved against the page location.
    pub url: String,
    /// HTTP method (GET by default).
    pub method: Method,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Requested body materialization.
    pub response_type: ResponseType,
    /// Upload progress hook (privileged and legacy transports only).
    pub on_progress: Option<ProgressFn>,
    /// Whether the timeout window applies.
    pub use_timeout: bool,
    /// Whether the request needs cross-origin access.
    pub cross_origin: bool,
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("headers", &self.headers)
            .field("response_type", &self.response_type)
            .field("on_progress", &self.on_progress.is_some())
            .field("use_timeout", &self.use_timeout)
            .field("cross_origin", &self.cross_origin)
            .finish()
    }
}

impl RequestDescriptor {
    /// Creates a GET request with no headers, no body and no timeout.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            body: None,
            headers: BTreeMap::new(),
            response_type: ResponseType::Text,
            on_progress: None,
            use_timeout: false,
            cross_origin: false,
        }
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds (or replaces) a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds every header from the mapping.
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the response materialization.
    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Sets the upload progress hook.
    #[must_use]
    pub fn on_progress(mut self, progress: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(progress));
        self
    }

    /// Opts in or out of timeout enforcement.
    #[must_use]
    pub fn timeout(mut self, use_timeout: bool) -> Self {
        self.use_timeout = use_timeout;
        self
    }

    /// Marks the request as needing cross-origin access.
    #[must_use]
    pub fn cross_origin(mut self, cross_origin: bool) -> Self {
        self.cross_origin = cross_origin;
        self
    }
}
