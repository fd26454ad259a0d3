//! Default User-Agent for the reqwest-backed transports.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/pagefetch";

/// Default User-Agent sent when the configuration does not override it.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("pagefetch/{version} (+{PROJECT_UA_URL})")
}
