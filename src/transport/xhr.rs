//! Ready-state request objects emulated on top of reqwest.
//!
//! [`EmulatedXhrApi`] is the default [`LegacyApi`]: it behaves like a
//! browser request object, reporting `Opened`, `HeadersReceived`, one
//! `Loading` per body chunk, then completion. Network failures complete with
//! status 0, exactly like a native request object would.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;
use url::Url;

use super::BackendKind;
use super::legacy::{LegacyApi, LegacyRequest};
use super::ready_state::{NativeAbort, ReadyState, ReadyStateCallback, ReadyStateEvent};
use super::request::{Progress, ProgressFn, ResponseType};
use super::response::{Body, Response};
use crate::error::BackendError;

/// Factory of reqwest-backed request objects.
#[derive(Debug, Clone)]
pub struct EmulatedXhrApi {
    client: Client,
}

impl EmulatedXhrApi {
    /// Creates a factory sharing one reqwest client (and its connection pool).
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl LegacyApi for EmulatedXhrApi {
    fn create(&self) -> Result<Box<dyn LegacyRequest>, BackendError> {
        Ok(Box::new(EmulatedXhr {
            client: self.client.clone(),
            target: None,
            response_type: ResponseType::Text,
            headers: HeaderMap::new(),
            handler: None,
            progress: None,
        }))
    }
}

struct EmulatedXhr {
    client: Client,
    target: Option<(Method, Url)>,
    response_type: ResponseType,
    headers: HeaderMap,
    handler: Option<ReadyStateCallback>,
    progress: Option<ProgressFn>,
}

impl EmulatedXhr {
    fn opened_url(&self, step: &str) -> Result<&Url, BackendError> {
        self.target.as_ref().map(|(_, url)| url).ok_or_else(|| {
            BackendError::open(BackendKind::Legacy, "", format!("{step} before open"))
        })
    }
}

impl LegacyRequest for EmulatedXhr {
    fn set_ready_state_handler(&mut self, handler: ReadyStateCallback) {
        self.handler = Some(handler);
    }

    fn set_upload_progress(&mut self, progress: ProgressFn) {
        self.progress = Some(progress);
    }

    fn open(&mut self, method: &Method, url: &Url) -> Result<(), BackendError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::open(
                BackendKind::Legacy,
                url.as_str(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        self.target = Some((method.clone(), url.clone()));
        Ok(())
    }

    fn set_response_type(&mut self, response_type: ResponseType) -> Result<(), BackendError> {
        self.opened_url("setting response type")?;
        self.response_type = response_type;
        Ok(())
    }

    fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        let url = self.opened_url("setting a header")?.to_string();
        let invalid = |reason: &str| {
            BackendError::open(BackendKind::Legacy, url.as_str(), format!("{reason} '{name}'"))
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid("invalid header name"))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| invalid("invalid value for header"))?;
        self.headers.append(header_name, header_value);
        Ok(())
    }

    fn send(self: Box<Self>, body: Option<Vec<u8>>) -> Result<Arc<dyn NativeAbort>, BackendError> {
        let Self {
            client,
            target,
            response_type,
            headers,
            handler,
            progress,
        } = *self;
        let Some((method, url)) = target else {
            return Err(BackendError::open(
                BackendKind::Legacy,
                "",
                "send before open",
            ));
        };
        let runtime = Handle::try_current().map_err(|_| BackendError::NoRuntime {
            backend: BackendKind::Legacy,
        })?;

        let upload_len = body.as_ref().map(|body| body.len() as u64);
        let mut builder = client.request(method, url.clone()).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let exchange = Exchange {
            url,
            response_type,
            handler: handler.unwrap_or_else(|| Arc::new(|_| {})),
            upload: progress.zip(upload_len),
        };
        let task = runtime.spawn(exchange.run(builder));
        Ok(Arc::new(TaskAbort(task.abort_handle())))
    }
}

struct Exchange {
    url: Url,
    response_type: ResponseType,
    handler: ReadyStateCallback,
    upload: Option<(ProgressFn, u64)>,
}

impl Exchange {
    async fn run(self, builder: RequestBuilder) {
        let handler = &self.handler;
        handler(ReadyStateEvent::Progress(ReadyState::Opened));

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(error = %error, url = %self.url, "emulated request failed");
                self.fail();
                return;
            }
        };
        if let Some((progress, len)) = &self.upload {
            progress(Progress {
                loaded: *len,
                total: Some(*len),
            });
        }
        handler(ReadyStateEvent::Progress(ReadyState::HeadersReceived));

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    data.extend_from_slice(&chunk);
                    handler(ReadyStateEvent::Progress(ReadyState::Loading));
                }
                Err(error) => {
                    debug!(error = %error, url = %self.url, "emulated request body failed");
                    self.fail();
                    return;
                }
            }
        }

        let body = match self.response_type {
            ResponseType::Text => Body::Text(String::from_utf8_lossy(&data).into_owned()),
            ResponseType::ArrayBuffer => Body::Binary(data),
            ResponseType::Blob => Body::Blob {
                content_type: headers
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(ToString::to_string),
                data,
            },
        };
        let response = Response::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
            final_url,
        )
        .with_headers(headers)
        .with_body(body);
        handler(ReadyStateEvent::Complete(response));
    }

    fn fail(&self) {
        (self.handler)(ReadyStateEvent::Complete(Response::new(0, "", self.url.as_str())));
    }
}

struct TaskAbort(AbortHandle);

impl NativeAbort for TaskAbort {
    fn abort(&self) -> Result<(), BackendError> {
        self.0.abort();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> Box<dyn LegacyRequest> {
        EmulatedXhrApi::new(Client::new()).create().unwrap()
    }

    #[test]
    fn test_configuring_before_open_fails() {
        let mut xhr = request();
        assert!(xhr.set_request_header("X-A", "1").is_err());
        assert!(xhr.set_response_type(ResponseType::Blob).is_err());
    }

    #[test]
    fn test_open_rejects_non_http_scheme() {
        let mut xhr = request();
        let error = xhr
            .open(&Method::GET, &Url::parse("ftp://board.example/").unwrap())
            .unwrap_err();
        assert!(error.is_construction_failure());
    }

    #[test]
    fn test_invalid_header_rejected_after_open() {
        let mut xhr = request();
        xhr.open(&Method::GET, &Url::parse("https://board.example/").unwrap())
            .unwrap();
        assert!(xhr.set_request_header("bad name", "x").is_err());
        assert!(xhr.set_request_header("If-None-Match", "\"v1\"").is_ok());
    }

    #[test]
    fn test_send_before_open_fails() {
        let xhr = request();
        assert!(xhr.send(None).is_err());
    }
}
