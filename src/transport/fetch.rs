//! Native fetch-like transport backed by reqwest.
//!
//! The timeout here is absolute: the whole exchange (headers and body) must
//! finish inside the window. Cancellation and timeout both abort the request
//! by dropping its task.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::{Client, RequestBuilder};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use url::Url;

use super::capabilities::Capabilities;
use super::request::{RequestDescriptor, ResponseType};
use super::response::{Body, Response, is_status_ok};
use super::{AbortFn, Backend, BackendKind, PreparedRequest};
use crate::error::{BackendError, TransportError};
use crate::operation::Settle;

/// Picks the referrer sent with a fetch.
///
/// The document referrer is forwarded unchanged only when it already points
/// at the target's origin; otherwise the current page location is sent, so
/// a foreign referrer never leaks while same-origin requests still carry one.
#[must_use]
pub fn select_referrer(document_referrer: Option<&str>, target: &Url, location: &Url) -> String {
    let origin = target.origin().ascii_serialization();
    match document_referrer {
        Some(referrer)
            if referrer == origin
                || referrer
                    .strip_prefix(origin.as_str())
                    .is_some_and(|rest| rest.starts_with('/')) =>
        {
            referrer.to_string()
        }
        _ => location.to_string(),
    }
}

/// Fetch transport: highest priority whenever the environment allows it.
#[derive(Debug, Clone)]
pub struct FetchBackend {
    client: Client,
    location: Url,
    document_referrer: Option<String>,
}

impl FetchBackend {
    /// Creates the backend around a configured reqwest client.
    #[must_use]
    pub fn new(client: Client, location: Url, document_referrer: Option<String>) -> Self {
        Self {
            client,
            location,
            document_referrer,
        }
    }

    fn build(&self, prepared: &PreparedRequest) -> RequestBuilder {
        let descriptor = &prepared.descriptor;
        let referrer = select_referrer(
            self.document_referrer.as_deref(),
            &prepared.url,
            &self.location,
        );
        let mut builder = self
            .client
            .request(descriptor.method.clone(), prepared.url.clone())
            .header(REFERER, referrer);
        for (name, value) in &descriptor.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &descriptor.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

impl Backend for FetchBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fetch
    }

    fn is_eligible(&self, request: &RequestDescriptor, capabilities: &Capabilities) -> bool {
        capabilities.can_fetch(request.cross_origin)
    }

    #[instrument(level = "debug", skip_all, fields(url = %prepared.url))]
    fn start(
        &self,
        prepared: &PreparedRequest,
        settle: Settle<Response>,
    ) -> Result<AbortFn, BackendError> {
        let runtime = Handle::try_current().map_err(|_| BackendError::NoRuntime {
            backend: BackendKind::Fetch,
        })?;
        let builder = self.build(prepared);
        let response_type = prepared.descriptor.response_type;
        let window = prepared.timeout;

        let task = runtime.spawn(async move {
            let outcome = match window {
                Some(window) => run_with_timeout(window, builder, response_type).await,
                None => perform(builder, response_type).await,
            };
            settle.settle(outcome);
        });
        let abort = task.abort_handle();
        Ok(Box::new(move || abort.abort()))
    }
}

async fn run_with_timeout(
    window: Duration,
    builder: RequestBuilder,
    response_type: ResponseType,
) -> Result<Response, TransportError> {
    // Elapsing drops the in-flight exchange, which aborts it.
    tokio::time::timeout(window, perform(builder, response_type))
        .await
        .unwrap_or_else(|_| {
            debug!("fetch timed out; aborting");
            Err(TransportError::TIMEOUT)
        })
}

async fn perform(
    builder: RequestBuilder,
    response_type: ResponseType,
) -> Result<Response, TransportError> {
    let response = builder.send().await.map_err(network_failure)?;

    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or_default();
    if !is_status_ok(status.as_u16()) {
        return Err(TransportError::http_status(status.as_u16(), status_text));
    }

    let url = response.url().to_string();
    let headers = response.headers().clone();
    let body = match response_type {
        ResponseType::Text => Body::Text(response.text().await.map_err(network_failure)?),
        ResponseType::ArrayBuffer => {
            Body::Binary(response.bytes().await.map_err(network_failure)?.to_vec())
        }
        ResponseType::Blob => {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);
            let data = response.bytes().await.map_err(network_failure)?.to_vec();
            Body::Blob { content_type, data }
        }
    };

    Ok(Response::new(status.as_u16(), status_text, url)
        .with_headers(headers)
        .with_body(body))
}

fn network_failure(error: reqwest::Error) -> TransportError {
    debug!(error = %error, "fetch failed without a usable response");
    let code = error.status().map_or(0, |status| i32::from(status.as_u16()));
    TransportError::new(code, "")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_same_origin_referrer_forwarded() {
        let referrer = select_referrer(
            Some("https://board.example/b/res/1.html"),
            &url("https://board.example/b/res/2.html"),
            &url("https://board.example/b/"),
        );
        assert_eq!(referrer, "https://board.example/b/res/1.html");
    }

    #[test]
    fn test_foreign_referrer_replaced_by_location() {
        let referrer = select_referrer(
            Some("https://search.example/?q=board"),
            &url("https://board.example/b/res/2.html"),
            &url("https://board.example/b/"),
        );
        assert_eq!(referrer, "https://board.example/b/");
    }

    #[test]
    fn test_lookalike_host_is_not_same_origin() {
        let referrer = select_referrer(
            Some("https://board.example.evil/page"),
            &url("https://board.example/b/"),
            &url("https://board.example/"),
        );
        assert_eq!(referrer, "https://board.example/");
    }

    #[test]
    fn test_missing_referrer_uses_location() {
        let referrer = select_referrer(
            None,
            &url("https://board.example/b/"),
            &url("https://board.example/b/res/9.html"),
        );
        assert_eq!(referrer, "https://board.example/b/res/9.html");
    }

    #[test]
    fn test_eligibility_follows_cross_origin_mode() {
        let backend = FetchBackend::new(Client::new(), url("https://board.example/"), None);
        let caps = Capabilities::new(true, false, true);
        assert!(backend.is_eligible(&RequestDescriptor::get("/a"), &caps));
        assert!(!backend.is_eligible(&RequestDescriptor::get("/a").cross_origin(true), &caps));
    }
}
