//! User-facing classification of load errors.

use std::borrow::Cow;

use crate::error::{ErrorClass, NO_CONNECTION_MESSAGE, TransportError};

/// What the surrounding application should show after a failed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadNotice {
    /// Code 200: hide any transient error notice.
    Dismiss,
    /// Code 0: the server was never reached.
    Connectivity(String),
    /// Any other code: the server (or application) refused the load.
    Failure {
        /// Code to surface to the user.
        code: i32,
        /// Rendered error.
        message: String,
        /// Whether the page title should be prefixed with `{code}`.
        annotate_title: bool,
    },
}

impl LoadNotice {
    /// Maps an error to its notice. `show_error` controls title annotation
    /// for failures.
    #[must_use]
    pub fn classify(error: &TransportError, show_error: bool) -> Self {
        match error.classify() {
            ErrorClass::Success => Self::Dismiss,
            ErrorClass::Connectivity => Self::Connectivity(
                error.message().unwrap_or(NO_CONNECTION_MESSAGE).to_string(),
            ),
            ErrorClass::Application | ErrorClass::HttpStatus(_) => Self::Failure {
                code: error.code(),
                message: error.to_string(),
                annotate_title: show_error,
            },
        }
    }

    /// Title to display, prefixed with `{code}` for annotated failures.
    #[must_use]
    pub fn title<'a>(&self, title: &'a str) -> Cow<'a, str> {
        match self {
            Self::Failure {
                code,
                annotate_title: true,
                ..
            } => Cow::Owned(format!("{{{code}}} {title}")),
            _ => Cow::Borrowed(title),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_dismisses() {
        assert_eq!(
            LoadNotice::classify(&TransportError::SUCCESS, true),
            LoadNotice::Dismiss
        );
    }

    #[test]
    fn test_connectivity_uses_message_or_default() {
        assert_eq!(
            LoadNotice::classify(&TransportError::TIMEOUT, true),
            LoadNotice::Connectivity("Connection error (timeout)".to_string())
        );
        assert_eq!(
            LoadNotice::classify(&TransportError::no_connection(), true),
            LoadNotice::Connectivity(NO_CONNECTION_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_http_failure_annotates_title() {
        let notice = LoadNotice::classify(&TransportError::http_status(404, "Not Found"), true);
        assert_eq!(
            notice,
            LoadNotice::Failure {
                code: 404,
                message: "HTTP [404] Not Found".to_string(),
                annotate_title: true,
            }
        );
        assert_eq!(notice.title("/b/ - Thread"), "{404} /b/ - Thread");
    }

    #[test]
    fn test_locked_without_title_annotation() {
        let notice = LoadNotice::classify(&TransportError::LOCKED, false);
        assert!(matches!(notice, LoadNotice::Failure { code: -1, .. }));
        assert_eq!(notice.title("Thread"), "Thread");
    }
}
