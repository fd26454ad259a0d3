//! Constants for the transport module (timeouts, dispatch budget).

use std::time::Duration;

/// Default timeout window for requests that opt into timeout enforcement.
///
/// Absolute for the fetch transport; measured as inactivity between
/// ready-state transitions for the privileged and legacy transports.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default connect timeout for reqwest-backed transports.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Dispatch attempts per request: the initial attempt plus one retry after a
/// legacy transport construction failure.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 2;
