//! Per-URL validation cache driving conditional and cache-busted requests.
//!
//! For every URL the cache remembers whether the server sent `Cache-Control`
//! and which validators (`ETag`, `Last-Modified`) it returned. The next
//! request to that URL then either carries `If-None-Match` /
//! `If-Modified-Since`, or a random `nocache` query parameter when the server
//! never declared cache control, so caching proxies that ignore validators
//! still miss.
//!
//! Entries are overwritten by every non-304 response. Concurrent requests to
//! one URL race and the last completed response wins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::operation::CancelableOperation;
use crate::transport::{RequestDescriptor, Response, Transport};

/// Query parameter appended to force a cache miss.
pub const CACHE_BUST_PARAM: &str = "nocache";

/// Caching metadata remembered for one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    /// The last response carried a `Cache-Control` header.
    pub has_cache_control: bool,
    /// `If-None-Match` / `If-Modified-Since` derived from the last response.
    pub conditional_headers: Option<BTreeMap<String, String>>,
}

/// Validation cache layered over a [`Transport`].
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct ValidationCache {
    transport: Arc<Transport>,
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl fmt::Debug for ValidationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationCache")
            .field("transport", &self.transport)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ValidationCache {
    /// Creates an empty cache over the transport.
    #[must_use]
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Requests `url` through the cache with timeout enforcement.
    ///
    /// Sends the stored validators when `use_cache` is set, and busts
    /// intermediate caches when the URL is known to lack `Cache-Control`.
    /// When the response is the first one seen for the URL, or it declares
    /// `Cache-Control`, one more unconditional cache-busted request is issued
    /// and its response is returned instead. 304 responses resolve as-is.
    #[instrument(skip(self))]
    pub fn run(&self, url: &str, use_cache: bool) -> CancelableOperation<Response> {
        let entry = self.entry(url);
        let request_url = match &entry {
            Some(entry) if !entry.has_cache_control => bust_cache(url),
            _ => url.to_string(),
        };
        let mut request = RequestDescriptor::get(request_url).timeout(true);
        if use_cache && let Some(headers) = entry.and_then(|entry| entry.conditional_headers) {
            request = request.headers(headers);
        }

        let cache = self.clone();
        let url = url.to_string();
        self.transport.request(request).and_then(move |response| {
            if response.is_not_modified() {
                debug!(url = %url, "not modified");
                return CancelableOperation::resolved(response);
            }
            if cache.save(&url, &response) {
                debug!(url = %url, "re-requesting unconditionally");
                return cache
                    .transport
                    .request(RequestDescriptor::get(bust_cache(&url)).timeout(true));
            }
            CancelableOperation::resolved(response)
        })
    }

    /// Records the response's caching metadata for `url`, replacing any
    /// previous entry.
    ///
    /// Returns true when a repeat fetch is warranted: the URL had no entry
    /// yet, or the response carried `Cache-Control`.
    #[instrument(level = "debug", skip(self, response))]
    pub fn save(&self, url: &str, response: &Response) -> bool {
        let mut has_cache_control = false;
        let mut etag = None;
        let mut last_modified = None;
        for (name, value) in response.headers() {
            match name.as_str() {
                "cache-control" => has_cache_control = true,
                "etag" => etag = value.to_str().ok(),
                "last-modified" => last_modified = value.to_str().ok(),
                _ => continue,
            }
            if has_cache_control && etag.is_some() && last_modified.is_some() {
                break;
            }
        }

        let conditional_headers = (etag.is_some() || last_modified.is_some()).then(|| {
            let mut headers = BTreeMap::new();
            if let Some(etag) = etag {
                headers.insert("If-None-Match".to_string(), etag.to_string());
            }
            if let Some(last_modified) = last_modified {
                headers.insert("If-Modified-Since".to_string(), last_modified.to_string());
            }
            headers
        });
        let entry = CacheEntry {
            has_cache_control,
            conditional_headers,
        };
        debug!(?entry, "saving cache entry");

        let seen_before = self.entries.insert(url.to_string(), entry).is_some();
        !seen_before || has_cache_control
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshot of the entry for `url`.
    #[must_use]
    pub fn entry(&self, url: &str) -> Option<CacheEntry> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Appends `nocache=<random>` to the query, keeping any fragment last.
#[must_use]
pub fn bust_cache(url: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let nonce: u32 = rand::random();
    let mut busted = format!("{base}{separator}{CACHE_BUST_PARAM}={nonce}");
    if let Some(fragment) = fragment {
        busted.push('#');
        busted.push_str(fragment);
    }
    busted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderMap;
    use url::Url;

    use super::*;
    use crate::transport::{Capabilities, headers_from_pairs};

    fn cache() -> ValidationCache {
        let transport = Transport::new(
            Url::parse("https://board.example/").unwrap(),
            Capabilities::default(),
        );
        ValidationCache::new(Arc::new(transport))
    }

    fn response(headers: HeaderMap) -> Response {
        Response::new(200, "OK", "https://board.example/b/").with_headers(headers)
    }

    #[test]
    fn test_bust_cache_picks_separator() {
        let busted = bust_cache("https://board.example/b/res/1.html");
        assert!(busted.starts_with("https://board.example/b/res/1.html?nocache="));

        let busted = bust_cache("https://board.example/api?thread=1");
        assert!(busted.starts_with("https://board.example/api?thread=1&nocache="));
    }

    #[test]
    fn test_bust_cache_keeps_fragment_last() {
        let busted = bust_cache("/b/res/1.html#p5");
        assert!(busted.starts_with("/b/res/1.html?nocache="));
        assert!(busted.ends_with("#p5"));
    }

    #[test]
    fn test_save_first_sighting_requests_repeat() {
        let cache = cache();
        let headers = headers_from_pairs([("ETag", "\"abc\"")]);
        assert!(cache.save("/b/", &response(headers.clone())));
        // Seen before and no cache-control.
        assert!(!cache.save("/b/", &response(headers)));
    }

    #[test]
    fn test_save_cache_control_always_requests_repeat() {
        let cache = cache();
        let headers = headers_from_pairs([("Cache-Control", "no-cache")]);
        assert!(cache.save("/b/", &response(headers.clone())));
        assert!(cache.save("/b/", &response(headers)));
        assert!(cache.entry("/b/").unwrap().has_cache_control);
    }

    #[test]
    fn test_save_derives_conditional_headers() {
        let cache = cache();
        let headers = headers_from_pairs([
            ("Content-Type", "text/html"),
            ("ETag", "\"v1\""),
            ("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ]);
        cache.save("/b/", &response(headers));

        let entry = cache.entry("/b/").unwrap();
        assert!(!entry.has_cache_control);
        let conditional = entry.conditional_headers.unwrap();
        assert_eq!(conditional.len(), 2);
        assert_eq!(conditional["If-None-Match"], "\"v1\"");
        assert_eq!(
            conditional["If-Modified-Since"],
            "Wed, 21 Oct 2015 07:28:00 GMT"
        );
    }

    #[test]
    fn test_save_overwrites_previous_entry() {
        let cache = cache();
        cache.save("/b/", &response(headers_from_pairs([("ETag", "\"v1\"")])));
        cache.save("/b/", &response(HeaderMap::new()));
        assert_eq!(cache.entry("/b/").unwrap(), CacheEntry::default());
    }

    #[test]
    fn test_clear_resets_entries() {
        let cache = cache();
        cache.save("/a/", &response(HeaderMap::new()));
        cache.save("/b/", &response(HeaderMap::new()));
        assert_eq!(cache.len(), 2);

        cache.clone().clear();
        assert!(cache.is_empty());
        assert!(cache.save("/a/", &response(HeaderMap::new())));
    }
}
