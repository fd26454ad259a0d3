//! Normalized responses and header normalization.
//!
//! Backends expose headers in different shapes: reqwest hands over a
//! [`HeaderMap`], script hosts hand over a raw CRLF-separated block or an
//! array of pairs. Everything is normalized into a [`HeaderMap`] here so the
//! validation cache never branches on backend identity.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Materialized response body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// No body (e.g. 304 Not Modified from a host that reports none).
    #[default]
    Empty,
    /// Decoded text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Raw bytes with the declared content type.
    Blob {
        /// `Content-Type` of the response, if any.
        content_type: Option<String>,
        /// Body bytes.
        data: Vec<u8>,
    },
}

/// A completed response, identical in shape across backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    status_text: String,
    url: String,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: u16, status_text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Replaces the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// HTTP status (0 when the request never got a response).
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status text reported by the backend.
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Effective URL after redirects.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Consumes the response, returning the body.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Text payload; empty for binary and absent bodies.
    #[must_use]
    pub fn text(&self) -> &str {
        match &self.body {
            Body::Text(text) => text,
            _ => "",
        }
    }

    /// Returns true for 304 Not Modified.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// The single status predicate shared by every backend: any 2xx, plus 304 so
/// that cache-hit logic downstream sees Not Modified as a success.
#[must_use]
pub fn is_status_ok(status: u16) -> bool {
    (200..300).contains(&status) || status == 304
}

/// Parses a raw header block (`name: value` lines separated by CRLF).
///
/// Lines without a colon and names or values that are not valid HTTP header
/// tokens are skipped.
#[must_use]
pub fn parse_raw_headers(raw: &str) -> HeaderMap {
    headers_from_pairs(raw.split("\r\n").filter_map(|line| {
        let (name, value) = line.split_once(':')?;
        Some((name.trim(), value.trim()))
    }))
}

/// Builds a header map from name/value pairs, skipping invalid entries.
pub fn headers_from_pairs<I, K, V>(pairs: I) -> HeaderMap
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let (name, value) = (name.as_ref(), value.as_ref());
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = name, "skipping malformed response header"),
        }
    }
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok_policy() {
        assert!(is_status_ok(200));
        assert!(is_status_ok(206));
        assert!(is_status_ok(299));
        assert!(is_status_ok(304));
        assert!(!is_status_ok(0));
        assert!(!is_status_ok(301));
        assert!(!is_status_ok(404));
        assert!(!is_status_ok(500));
    }

    #[test]
    fn test_parse_raw_headers_block() {
        let raw = "Content-Type: text/html\r\nETag: \"v1\"\r\nLast-Modified: Tue, 01 Oct 2024 10:00:00 GMT\r\n";
        let headers = parse_raw_headers(raw);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("etag").unwrap(), "\"v1\"");
        assert_eq!(
            headers.get("last-modified").unwrap(),
            "Tue, 01 Oct 2024 10:00:00 GMT"
        );
    }

    #[test]
    fn test_parse_raw_headers_skips_garbage() {
        let headers = parse_raw_headers("no colon here\r\nbad name: x\r\nX-Ok: yes");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
    }

    #[test]
    fn test_headers_from_pairs_keeps_duplicates() {
        let headers = headers_from_pairs([("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]);
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_response_text_accessor() {
        let response = Response::new(200, "OK", "https://x/y").with_body(Body::Text("hi".into()));
        assert_eq!(response.text(), "hi");
        let binary = Response::new(200, "OK", "https://x/y").with_body(Body::Binary(vec![1, 2]));
        assert_eq!(binary.text(), "");
        assert_eq!(binary.into_body(), Body::Binary(vec![1, 2]));
        assert!(Response::new(304, "Not Modified", "https://x/y").is_not_modified());
    }
}
