//! Error types shared by every transport layer.
//!
//! Callers only ever observe [`TransportError`]. The other types here are
//! internal taxonomies that get converted at the boundary where they are
//! first detected:
//!
//! - [`DataError`] - the response arrived but its payload is unusable
//!   (missing `</html>`, malformed JSON, builder rejection)
//! - [`BackendError`] - a backend could not be constructed or opened
//!
//! # Code ordering
//!
//! A [`TransportError`] code is read with one rule:
//! - `code < 0` - application-level condition (e.g. thread locked)
//! - `code == 0` - never reached the server (no connection, timeout, corrupt data)
//! - `code > 0` - the server answered with this HTTP status

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::transport::BackendKind;

/// Message rendered for connectivity-class errors that carry no message.
pub const NO_CONNECTION_MESSAGE: &str = "Connection error";

/// Message used when a response body cannot be interpreted.
pub const CORRUPT_DATA_MESSAGE: &str = "Corrupt data";

/// Uniform error value carried by every rejected [`CancelableOperation`].
///
/// [`CancelableOperation`]: crate::CancelableOperation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    code: i32,
    message: Option<Cow<'static, str>>,
}

impl TransportError {
    /// Explicit success signal (HTTP 200). Distinct from "no error": callers
    /// use it to dismiss transient error notices.
    pub const SUCCESS: Self = Self {
        code: 200,
        message: Some(Cow::Borrowed("OK")),
    };

    /// The thread is closed for new content.
    pub const LOCKED: Self = Self {
        code: -1,
        message: Some(Cow::Borrowed("Thread is closed")),
    };

    /// The timeout window elapsed, or the operation was cancelled before it settled.
    pub const TIMEOUT: Self = Self {
        code: 0,
        message: Some(Cow::Borrowed("Connection error (timeout)")),
    };

    /// Creates an error with the given code and message.
    pub fn new(code: i32, message: impl Into<Cow<'static, str>>) -> Self {
        let message = message.into();
        Self {
            code,
            message: (!message.is_empty()).then_some(message),
        }
    }

    /// Creates a connectivity-class error with no message of its own.
    #[must_use]
    pub fn no_connection() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    /// Creates an error for a non-OK HTTP status.
    pub fn http_status(status: u16, status_text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(i32::from(status), status_text)
    }

    /// Returns the numeric code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the message, if one was supplied.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true when the request never got an answer from the server.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        self.code == 0
    }

    /// Returns true for the timeout/cancellation sentinel.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        *self == Self::TIMEOUT
    }

    /// Classifies the code per the single ordering rule.
    #[must_use]
    pub fn classify(&self) -> ErrorClass {
        match self.code {
            200 => ErrorClass::Success,
            0 => ErrorClass::Connectivity,
            code if code < 0 => ErrorClass::Application,
            code => ErrorClass::HttpStatus(u16::try_from(code).unwrap_or(u16::MAX)),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code <= 0 {
            f.write_str(self.message().unwrap_or(NO_CONNECTION_MESSAGE))
        } else {
            write!(f, "HTTP [{}] {}", self.code, self.message().unwrap_or_default())
        }
    }
}

impl std::error::Error for TransportError {}

/// Coarse classification of a [`TransportError`] code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Code 200: explicit success signal.
    Success,
    /// Code 0: the server was never reached.
    Connectivity,
    /// Negative code: application-level condition.
    Application,
    /// Any other positive code: the server answered with this status.
    HttpStatus(u16),
}

/// Payload-level failures detected after a response was received.
#[derive(Debug, Error)]
pub enum DataError {
    /// The page body does not contain the closing `</html>` marker.
    #[error("response is missing the closing </html> marker")]
    MissingHtmlTerminator,

    /// The document parsed but the expected element is absent.
    #[error("element '{selector}' not found in response document")]
    MissingElement {
        /// Selector that matched nothing.
        selector: String,
    },

    /// The JSON API body is not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The posts builder rejected otherwise well-formed input.
    #[error("posts builder rejected input: {0}")]
    Builder(String),
}

impl From<DataError> for TransportError {
    fn from(error: DataError) -> Self {
        match error {
            DataError::MissingHtmlTerminator | DataError::MissingElement { .. } => {
                Self::new(0, CORRUPT_DATA_MESSAGE)
            }
            other => Self::new(0, format!("{CORRUPT_DATA_MESSAGE}: {other}")),
        }
    }
}

/// Failures raised while constructing or opening a backend request.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The native request object could not be created.
    #[error("{backend} transport could not be constructed: {reason}")]
    Construct {
        /// Backend that failed.
        backend: BackendKind,
        /// Host-supplied reason.
        reason: String,
    },

    /// The native request object refused to open or send.
    #[error("{backend} transport failed to open {url}: {reason}")]
    Open {
        /// Backend that failed.
        backend: BackendKind,
        /// Absolute request URL.
        url: String,
        /// Host-supplied reason.
        reason: String,
    },

    /// The backend needs a tokio runtime and none is entered.
    #[error("no async runtime available for {backend} transport")]
    NoRuntime {
        /// Backend that failed.
        backend: BackendKind,
    },

    /// The request URL cannot be resolved against the page location.
    #[error("invalid request URL '{url}'")]
    InvalidUrl {
        /// URL as supplied by the caller.
        url: String,
    },

    /// No backend is eligible for this request in the current environment.
    #[error("no transport backend available for {url}")]
    Unavailable {
        /// URL as supplied by the caller.
        url: String,
    },
}

impl BackendError {
    /// Creates a construction failure.
    pub fn construct(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::Construct {
            backend,
            reason: reason.into(),
        }
    }

    /// Creates an open/send failure.
    pub fn open(backend: BackendKind, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Open {
            backend,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the failure happened while constructing or opening
    /// the native request, which permanently disables a fallible backend.
    #[must_use]
    pub fn is_construction_failure(&self) -> bool {
        matches!(self, Self::Construct { .. } | Self::Open { .. })
    }
}

impl From<BackendError> for TransportError {
    fn from(error: BackendError) -> Self {
        Self::new(0, error.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_codes_render_bare_message() {
        assert_eq!(TransportError::TIMEOUT.to_string(), "Connection error (timeout)");
        assert_eq!(TransportError::no_connection().to_string(), NO_CONNECTION_MESSAGE);
        assert_eq!(TransportError::new(0, "").to_string(), NO_CONNECTION_MESSAGE);
        assert_eq!(TransportError::LOCKED.to_string(), "Thread is closed");
    }

    #[test]
    fn test_http_codes_render_with_prefix() {
        let error = TransportError::http_status(404, "Not Found");
        assert_eq!(error.to_string(), "HTTP [404] Not Found");
        assert_eq!(TransportError::SUCCESS.to_string(), "HTTP [200] OK");
    }

    #[test]
    fn test_classify_follows_code_ordering() {
        assert_eq!(TransportError::SUCCESS.classify(), ErrorClass::Success);
        assert_eq!(TransportError::TIMEOUT.classify(), ErrorClass::Connectivity);
        assert_eq!(TransportError::LOCKED.classify(), ErrorClass::Application);
        assert_eq!(
            TransportError::http_status(503, "Service Unavailable").classify(),
            ErrorClass::HttpStatus(503)
        );
    }

    #[test]
    fn test_timeout_sentinel_identity() {
        assert!(TransportError::TIMEOUT.is_timeout());
        assert!(!TransportError::no_connection().is_timeout());
        assert!(TransportError::no_connection().is_connectivity());
    }

    #[test]
    fn test_data_error_converts_to_code_zero() {
        let error: TransportError = DataError::MissingHtmlTerminator.into();
        assert_eq!(error.code(), 0);
        assert_eq!(error.message(), Some(CORRUPT_DATA_MESSAGE));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: TransportError = DataError::Json(json_err).into();
        assert_eq!(error.code(), 0);
        assert!(error.to_string().starts_with(CORRUPT_DATA_MESSAGE));
    }

    #[test]
    fn test_backend_error_construction_flag() {
        let error = BackendError::construct(BackendKind::Legacy, "blocked by policy");
        assert!(error.is_construction_failure());
        assert!(error.to_string().contains("blocked by policy"));

        let error = BackendError::NoRuntime {
            backend: BackendKind::Fetch,
        };
        assert!(!error.is_construction_failure());
        let transport: TransportError = error.into();
        assert_eq!(transport.code(), 0);
    }
}
