//! Environment capability flags consulted during backend selection.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// What the host environment allows.
///
/// The fetch flags are fixed at construction. The native legacy flag starts
/// from configuration and can only go from `true` to `false`: it flips the
/// first time the legacy transport fails to construct and stays off for the
/// rest of the process.
#[derive(Debug)]
pub struct Capabilities {
    fetch: bool,
    fetch_cross_origin: bool,
    native_legacy: AtomicBool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

impl Capabilities {
    /// Creates capability flags.
    #[must_use]
    pub fn new(fetch: bool, fetch_cross_origin: bool, native_legacy: bool) -> Self {
        Self {
            fetch,
            fetch_cross_origin,
            native_legacy: AtomicBool::new(native_legacy),
        }
    }

    /// Whether the native fetch transport may serve this cross-origin mode.
    #[must_use]
    pub fn can_fetch(&self, cross_origin: bool) -> bool {
        if cross_origin {
            self.fetch_cross_origin
        } else {
            self.fetch
        }
    }

    /// Whether the native legacy transport is still considered usable.
    #[must_use]
    pub fn native_legacy(&self) -> bool {
        self.native_legacy.load(Ordering::SeqCst)
    }

    /// Permanently marks the native legacy transport unusable.
    ///
    /// Returns true if this call performed the transition.
    pub fn disable_native_legacy(&self) -> bool {
        let was_enabled = self.native_legacy.swap(false, Ordering::SeqCst);
        if was_enabled {
            warn!("native legacy transport disabled for the rest of the process");
        }
        was_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_flags_per_mode() {
        let caps = Capabilities::new(true, false, true);
        assert!(caps.can_fetch(false));
        assert!(!caps.can_fetch(true));
    }

    #[test]
    fn test_native_legacy_disables_once() {
        let caps = Capabilities::default();
        assert!(caps.native_legacy());
        assert!(caps.disable_native_legacy());
        assert!(!caps.disable_native_legacy());
        assert!(!caps.native_legacy());
    }
}
