//! Page and thread loading on top of the validation cache.
//!
//! Document parsing and post-model construction belong to the embedding
//! application and are supplied through [`BoardEngine`]. The loader only
//! decides what to request, when a response is usable, and when to fall back
//! from the JSON API to page scraping.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument, warn};

use crate::cache::ValidationCache;
use crate::error::DataError;
use crate::operation::CancelableOperation;
use crate::transport::Response;

/// Marker a complete page body must contain.
pub const HTML_TERMINATOR: &str = "</html>";

/// URL path segment identifying archived threads.
pub const ARCHIVE_PATH_MARKER: &str = "/arch/";

/// Board-specific parsing and URL conventions.
pub trait BoardEngine: Send + Sync + 'static {
    /// A parsed, queryable document or sub-element.
    type Fragment: Send + 'static;
    /// The posts model built from a thread.
    type Posts: Send + 'static;

    /// Selector of the element holding a thread's posts.
    fn form_selector(&self) -> &str;

    /// Parses response text into a document.
    fn parse_document(&self, html: &str) -> Self::Fragment;

    /// First element of `document` matching `selector`.
    fn select(&self, document: &Self::Fragment, selector: &str) -> Option<Self::Fragment>;

    /// Page URL of a thread.
    fn thread_url(&self, board: &str, thread: u64) -> String;

    /// JSON API URL of a thread, when the board has one.
    fn json_api_url(&self, board: &str, thread: u64) -> Option<String>;

    /// Builds posts from the JSON API body.
    ///
    /// # Errors
    ///
    /// Returns a [`DataError`] when the JSON does not describe a thread.
    fn build_from_json(&self, json: serde_json::Value, board: &str)
    -> Result<Self::Posts, DataError>;

    /// Builds posts from a thread's form element. `archived` is set when the
    /// engine is archive-aware.
    ///
    /// # Errors
    ///
    /// Returns a [`DataError`] when the form does not describe a thread.
    fn build_from_dom(
        &self,
        form: Self::Fragment,
        archived: Option<bool>,
    ) -> Result<Self::Posts, DataError>;

    /// Whether DOM-built posts need the archive flag.
    fn archive_aware(&self) -> bool {
        false
    }
}

/// A successfully loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFragment<F> {
    /// The whole document, or the form element when only the form was wanted.
    pub fragment: F,
    /// Whether the final response URL points into the archive; `None` unless
    /// the check was requested.
    pub archived: Option<bool>,
}

/// Load helpers bound to one cache and one board engine.
pub struct Loader<E> {
    cache: ValidationCache,
    engine: Arc<E>,
    json_api_enabled: Arc<AtomicBool>,
}

impl<E> Clone for Loader<E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            engine: Arc::clone(&self.engine),
            json_api_enabled: Arc::clone(&self.json_api_enabled),
        }
    }
}

impl<E> fmt::Debug for Loader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("cache", &self.cache)
            .field("json_api_enabled", &self.json_api_enabled())
            .finish_non_exhaustive()
    }
}

impl<E> Loader<E> {
    /// Whether the JSON API path is still in use.
    #[must_use]
    pub fn json_api_enabled(&self) -> bool {
        self.json_api_enabled.load(Ordering::Acquire)
    }

    /// The cache requests go through.
    #[must_use]
    pub fn cache(&self) -> &ValidationCache {
        &self.cache
    }

    fn disable_json_api(&self, error: &DataError) {
        if self.json_api_enabled.swap(false, Ordering::AcqRel) {
            warn!(error = %error, "JSON API error; switching to DOM parsing");
        }
    }
}

impl<E: BoardEngine> Loader<E> {
    /// Creates a loader with the JSON API path enabled.
    ///
    /// The JSON API switch is shared by this loader and its clones only. A
    /// loader built by a second call to `new` starts with JSON enabled again,
    /// even if another loader has already fallen back to page parsing.
    #[must_use]
    pub fn new(cache: ValidationCache, engine: Arc<E>) -> Self {
        Self {
            cache,
            engine,
            json_api_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Loads a page.
    ///
    /// Resolves to `None` on 304 Not Modified: the caller already holds the
    /// current page. A body without the closing `</html>` (or without the
    /// form, when `want_form_only`) rejects with a code-0 corrupt-data error.
    #[instrument(skip(self))]
    pub fn load_fragment(
        &self,
        url: &str,
        want_form_only: bool,
        use_cache: bool,
        check_archive: bool,
    ) -> CancelableOperation<Option<LoadedFragment<E::Fragment>>> {
        let engine = Arc::clone(&self.engine);
        self.cache.run(url, use_cache).and_then(move |response| {
            match interpret_page(engine.as_ref(), &response, want_form_only, check_archive) {
                Ok(loaded) => CancelableOperation::resolved(loaded),
                Err(error) => {
                    debug!(error = %error, url = response.url(), "unusable page");
                    CancelableOperation::rejected(error.into())
                }
            }
        })
    }

    /// Loads a thread's posts, preferring the JSON API.
    ///
    /// The first JSON payload that cannot be turned into posts disables the
    /// JSON API for the lifetime of this loader (and its clones) and the
    /// thread is reloaded from its page. Transport errors propagate as-is.
    #[instrument(skip(self))]
    pub fn load_thread_posts(
        &self,
        board: &str,
        thread: u64,
        use_cache: bool,
    ) -> CancelableOperation<Option<E::Posts>> {
        if self.json_api_enabled()
            && let Some(api_url) = self.engine.json_api_url(board, thread)
        {
            let loader = self.clone();
            let board = board.to_string();
            return self
                .cache
                .run(&api_url, use_cache)
                .and_then(move |response| {
                    if response.is_not_modified() {
                        return CancelableOperation::resolved(None);
                    }
                    match posts_from_json(loader.engine.as_ref(), &response, &board) {
                        Ok(posts) => CancelableOperation::resolved(Some(posts)),
                        Err(error) => {
                            loader.disable_json_api(&error);
                            loader.load_thread_posts(&board, thread, use_cache)
                        }
                    }
                });
        }
        self.load_thread_posts_from_page(board, thread, use_cache)
    }

    fn load_thread_posts_from_page(
        &self,
        board: &str,
        thread: u64,
        use_cache: bool,
    ) -> CancelableOperation<Option<E::Posts>> {
        let engine = Arc::clone(&self.engine);
        let url = self.engine.thread_url(board, thread);
        self.load_fragment(&url, true, use_cache, self.engine.archive_aware())
            .and_then(move |loaded| {
                let Some(LoadedFragment { fragment, archived }) = loaded else {
                    return CancelableOperation::resolved(None);
                };
                match engine.build_from_dom(fragment, archived) {
                    Ok(posts) => CancelableOperation::resolved(Some(posts)),
                    Err(error) => CancelableOperation::rejected(error.into()),
                }
            })
    }
}

fn interpret_page<E: BoardEngine>(
    engine: &E,
    response: &Response,
    want_form_only: bool,
    check_archive: bool,
) -> Result<Option<LoadedFragment<E::Fragment>>, DataError> {
    if response.is_not_modified() {
        return Ok(None);
    }
    let text = response.text();
    if !text.contains(HTML_TERMINATOR) {
        return Err(DataError::MissingHtmlTerminator);
    }
    let document = engine.parse_document(text);
    let fragment = if want_form_only {
        let selector = engine.form_selector();
        engine
            .select(&document, selector)
            .ok_or_else(|| DataError::MissingElement {
                selector: selector.to_string(),
            })?
    } else {
        document
    };
    Ok(Some(LoadedFragment {
        fragment,
        archived: check_archive.then(|| response.url().contains(ARCHIVE_PATH_MARKER)),
    }))
}

fn posts_from_json<E: BoardEngine>(
    engine: &E,
    response: &Response,
    board: &str,
) -> Result<E::Posts, DataError> {
    let json = serde_json::from_str(response.text())?;
    engine.build_from_json(json, board)
}
