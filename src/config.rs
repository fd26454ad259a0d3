//! Transport configuration and its `key = value` file loader.
//!
//! ```text
//! # page the transport runs on
//! location = "https://board.example/b/res/1.html"
//! document_referrer = "https://board.example/b/"
//! timeout_ms = 5000
//! fetch_cross_origin = false
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use url::Url;

use crate::transport::{CONNECT_TIMEOUT_SECS, Capabilities, DEFAULT_TIMEOUT};

/// Allowed range for `timeout_ms`.
const TIMEOUT_MS_RANGE: std::ops::RangeInclusive<u64> = 1..=600_000;

/// Allowed range for `connect_timeout_secs`.
const CONNECT_TIMEOUT_SECS_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Settings for [`build_default_transport`](crate::build_default_transport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Page location; relative request URLs resolve against it.
    pub location: Url,
    /// Referrer of the current document, if any.
    pub document_referrer: Option<String>,
    /// Timeout window for requests that opt in.
    pub timeout: Duration,
    /// Connect timeout for reqwest-backed transports, in seconds.
    pub connect_timeout_secs: u64,
    /// Fetch transport usable for same-origin requests.
    pub fetch: bool,
    /// Fetch transport usable for cross-origin requests.
    pub fetch_cross_origin: bool,
    /// Native legacy transport usable (may still be disabled at runtime).
    pub native_legacy: bool,
    /// User-Agent override.
    pub user_agent: Option<String>,
}

impl TransportConfig {
    /// Creates a config with defaults for everything but the page location.
    #[must_use]
    pub fn new(location: Url) -> Self {
        Self {
            location,
            document_referrer: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            fetch: true,
            fetch_cross_origin: true,
            native_legacy: true,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn document_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.document_referrer = Some(referrer.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Sets the fetch flags for same-origin and cross-origin requests.
    #[must_use]
    pub fn fetch(mut self, same_origin: bool, cross_origin: bool) -> Self {
        self.fetch = same_origin;
        self.fetch_cross_origin = cross_origin;
        self
    }

    #[must_use]
    pub fn native_legacy(mut self, usable: bool) -> Self {
        self.native_legacy = usable;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Capability flags seeded from this config.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(self.fetch, self.fetch_cross_origin, self.native_legacy)
    }

    /// Validates values against the accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        if !TIMEOUT_MS_RANGE.contains(&timeout_ms) {
            bail!("Invalid config value for `timeout_ms`: {timeout_ms}. Expected range: 1..=600000");
        }
        if !CONNECT_TIMEOUT_SECS_RANGE.contains(&self.connect_timeout_secs) {
            bail!(
                "Invalid config value for `connect_timeout_secs`: {}. Expected range: 1..=3600",
                self.connect_timeout_secs
            );
        }
        if !matches!(self.location.scheme(), "http" | "https") {
            bail!(
                "Invalid config value for `location`: '{}'. Expected an http(s) URL",
                self.location
            );
        }
        Ok(())
    }
}

/// Loads and validates a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails to parse.
pub fn load_config_file(path: &Path) -> Result<TransportConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Parses `key = value` lines into a validated config.
///
/// `location` is required; every other key falls back to its default.
/// Strings are double-quoted, `#` starts a comment outside strings.
///
/// # Errors
///
/// Returns an error for syntax errors, unknown keys, bad values, or a
/// missing `location`.
pub fn parse_config_str(raw: &str) -> Result<TransportConfig> {
    let mut location = None;
    let mut document_referrer = None;
    let mut timeout_ms = None;
    let mut connect_timeout_secs = None;
    let mut fetch = None;
    let mut fetch_cross_origin = None;
    let mut native_legacy = None;
    let mut user_agent = None;

    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "location" => {
                let parsed = unquote(key, value).with_context(context)?;
                location = Some(Url::parse(&parsed).with_context(context)?);
            }
            "document_referrer" => {
                document_referrer = Some(unquote(key, value).with_context(context)?);
            }
            "timeout_ms" => timeout_ms = Some(parse_count(key, value).with_context(context)?),
            "connect_timeout_secs" => {
                connect_timeout_secs = Some(parse_count(key, value).with_context(context)?);
            }
            "fetch" => fetch = Some(parse_switch(key, value).with_context(context)?),
            "fetch_cross_origin" => {
                fetch_cross_origin = Some(parse_switch(key, value).with_context(context)?);
            }
            "native_legacy" => native_legacy = Some(parse_switch(key, value).with_context(context)?),
            "user_agent" => user_agent = Some(unquote(key, value).with_context(context)?),
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }

    let Some(location) = location else {
        bail!("Missing required configuration key: 'location'");
    };
    let mut config = TransportConfig::new(location);
    config.document_referrer = document_referrer;
    config.user_agent = user_agent;
    if let Some(ms) = timeout_ms {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = connect_timeout_secs {
        config.connect_timeout_secs = secs;
    }
    config.fetch = fetch.unwrap_or(config.fetch);
    config.fetch_cross_origin = fetch_cross_origin.unwrap_or(config.fetch_cross_origin);
    config.native_legacy = native_legacy.unwrap_or(config.native_legacy);
    config.validate()?;
    Ok(config)
}

/// Cuts a trailing `# comment`, ignoring `#` inside quoted values.
fn strip_inline_comment(line: &str) -> &str {
    let mut quoted = false;
    let cut = line.char_indices().find_map(|(index, ch)| {
        if ch == '"' {
            quoted = !quoted;
        }
        (ch == '#' && !quoted).then_some(index)
    });
    cut.map_or(line, |index| &line[..index])
}

fn unquote(key: &str, raw_value: &str) -> Result<String> {
    raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("`{key}` takes a double-quoted string, got {raw_value}"))
}

fn parse_count(key: &str, raw_value: &str) -> Result<u64> {
    raw_value
        .parse::<u64>()
        .with_context(|| format!("`{key}` takes a non-negative integer, got {raw_value}"))
}

fn parse_switch(key: &str, raw_value: &str) -> Result<bool> {
    match raw_value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("`{key}` takes true or false, got {other}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_config_minimal_uses_defaults() {
        let config = parse_config_str(r#"location = "https://board.example/b/""#).unwrap();
        assert_eq!(config.location.as_str(), "https://board.example/b/");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout_secs, CONNECT_TIMEOUT_SECS);
        assert!(config.fetch && config.fetch_cross_origin && config.native_legacy);
        assert!(config.document_referrer.is_none());
    }

    #[test]
    fn test_parse_config_all_fields_with_comments() {
        let raw = r#"
            # page
            location = "https://board.example/b/res/1.html"
            document_referrer = "https://board.example/#top" # fragment kept
            timeout_ms = 2500
            connect_timeout_secs = 3
            fetch = true
            fetch_cross_origin = false
            native_legacy = false
            user_agent = "test-agent/1.0"
        "#;
        let config = parse_config_str(raw).unwrap();
        assert_eq!(
            config.document_referrer.as_deref(),
            Some("https://board.example/#top")
        );
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_timeout_secs, 3);
        assert!(!config.fetch_cross_origin);
        assert!(!config.native_legacy);
        assert_eq!(config.user_agent.as_deref(), Some("test-agent/1.0"));

        let capabilities = config.capabilities();
        assert!(capabilities.can_fetch(false));
        assert!(!capabilities.can_fetch(true));
        assert!(!capabilities.native_legacy());
    }

    #[test]
    fn test_parse_config_keeps_hash_inside_quotes() {
        let raw = "location = \"https://board.example/b/#top\" # board root\n\n# comment only";
        let config = parse_config_str(raw).unwrap();
        assert_eq!(config.location.fragment(), Some("top"));
    }

    #[test]
    fn test_parse_config_requires_location() {
        let error = parse_config_str("timeout_ms = 100").unwrap_err();
        assert!(error.to_string().contains("location"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_key_with_line() {
        let raw = "location = \"https://board.example/\"\nretries = 3";
        let error = parse_config_str(raw).unwrap_err();
        assert!(error.to_string().contains("'retries' on line 2"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_timeout() {
        let raw = "location = \"https://board.example/\"\ntimeout_ms = 0";
        let error = parse_config_str(raw).unwrap_err();
        assert!(error.to_string().contains("timeout_ms"));

        let raw = "location = \"https://board.example/\"\ntimeout_ms = 600001";
        assert!(parse_config_str(raw).is_err());
    }

    #[test]
    fn test_parse_config_rejects_bad_values() {
        let raw = "location = \"https://board.example/\"\nfetch = yes";
        let error = format!("{:#}", parse_config_str(raw).unwrap_err());
        assert!(error.contains("Invalid `fetch` value on line 2"), "{error}");
        assert!(error.contains("`fetch` takes true or false, got yes"), "{error}");

        let raw = "location = \"https://board.example/\"\nconnect_timeout_secs = -5";
        let error = format!("{:#}", parse_config_str(raw).unwrap_err());
        assert!(error.contains("`connect_timeout_secs` takes a non-negative integer"), "{error}");

        assert!(parse_config_str("location = https://board.example/").is_err());
        assert!(parse_config_str("location = \"not a url\"").is_err());
        assert!(parse_config_str("location = \"ftp://board.example/\"").is_err());
        assert!(parse_config_str("location").is_err());
    }

    #[test]
    fn test_load_config_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "location = \"https://board.example/\"").unwrap();
        writeln!(file, "timeout_ms = 750").unwrap();
        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(750));

        let missing = file.path().with_extension("missing");
        let error = load_config_file(&missing).unwrap_err();
        assert!(error.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_builder_setters() {
        let config = TransportConfig::new(Url::parse("https://board.example/").unwrap())
            .document_referrer("https://board.example/a/")
            .timeout(Duration::from_secs(1))
            .connect_timeout_secs(2)
            .fetch(false, false)
            .native_legacy(false)
            .user_agent("ua");
        assert!(config.validate().is_ok());
        assert!(!config.capabilities().can_fetch(false));
        assert_eq!(config.user_agent.as_deref(), Some("ua"));
    }
}
