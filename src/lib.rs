//! Cancelable multi-backend HTTP transport with validation caching.
//!
//! Requests go through whichever request mechanism the host environment
//! allows (native fetch, a privileged host primitive, or a legacy
//! ready-state request object) and always come back as a
//! [`CancelableOperation`] that settles exactly once with a [`Response`] or
//! a [`TransportError`].
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`operation`] - settle-once, cancel-propagating operations
//! - [`error`] - the uniform error value and internal error taxonomies
//! - [`transport`] - backends, capability flags and the dispatcher
//! - [`cache`] - per-URL ETag/Last-Modified validation cache
//! - [`loader`] - page and thread loading with JSON/DOM fallback
//! - [`notice`] - user-facing classification of load errors
//! - [`config`] - transport configuration and its file loader

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod notice;
pub mod operation;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheEntry, ValidationCache, bust_cache};
pub use config::{TransportConfig, load_config_file, parse_config_str};
pub use error::{BackendError, DataError, ErrorClass, TransportError};
pub use loader::{BoardEngine, LoadedFragment, Loader};
pub use notice::LoadNotice;
pub use operation::{CancelHandle, CancelableOperation, Settle};
pub use transport::{
    Backend, BackendKind, Body, Capabilities, DEFAULT_TIMEOUT, RequestDescriptor, Response,
    ResponseType, Transport, build_default_transport,
};
