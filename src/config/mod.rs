//! Configuration handling for a pipeline run.
//!
//! Every tunable the pipeline reads lives in [`Config`]. It is built once at
//! process start (`Config::from_env`) and handed to the orchestrator, so no
//! component reads the environment on its own. Tests build a `Config`
//! directly with [`Config::new`] and the `with_*` setters.

use regex::Regex;
use scraper::Selector;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::uploader::RetryPolicy;

/// Environment variable names.
pub const ENV_API_KEY: &str = "SIPHON_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "OPENAI_API_KEY";
pub const ENV_SOURCE_URL: &str = "SIPHON_SOURCE_URL";
pub const ENV_INGEST_ENDPOINT: &str = "SIPHON_INGEST_ENDPOINT";
pub const ENV_STATE_DIR: &str = "SIPHON_STATE_DIR";
pub const ENV_MAX_ARTICLES: &str = "SIPHON_MAX_ARTICLES";
pub const ENV_FETCH_CONCURRENCY: &str = "SIPHON_FETCH_CONCURRENCY";
pub const ENV_BATCH_MAX_ITEMS: &str = "SIPHON_BATCH_MAX_ITEMS";
pub const ENV_BATCH_MAX_BYTES: &str = "SIPHON_BATCH_MAX_BYTES";
pub const ENV_BATCH_PAUSE_MS: &str = "SIPHON_BATCH_PAUSE_MS";
pub const ENV_UPLOAD_MAX_ATTEMPTS: &str = "SIPHON_UPLOAD_MAX_ATTEMPTS";
pub const ENV_UPLOAD_BASE_DELAY_MS: &str = "SIPHON_UPLOAD_BASE_DELAY_MS";
pub const ENV_UPLOAD_MAX_DELAY_MS: &str = "SIPHON_UPLOAD_MAX_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SIPHON_REQUEST_TIMEOUT_SECS";
pub const ENV_PRUNE_REMOVED: &str = "SIPHON_PRUNE_REMOVED";
pub const ENV_CONTENT_SELECTOR: &str = "SIPHON_CONTENT_SELECTOR";
pub const ENV_LINK_SELECTOR: &str = "SIPHON_LINK_SELECTOR";
pub const ENV_LINK_PATTERN: &str = "SIPHON_LINK_PATTERN";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

const DEFAULT_SOURCE_URL: &str = "https://support.optisigns.com/hc/en-us";
const DEFAULT_INGEST_ENDPOINT: &str = "https://api.optibot.example/v1";
const DEFAULT_STATE_DIR: &str = "./state";
const DEFAULT_MAX_ARTICLES: usize = 40;
const DEFAULT_FETCH_CONCURRENCY: usize = 4;
const DEFAULT_BATCH_MAX_ITEMS: usize = 20;
const DEFAULT_BATCH_MAX_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_BATCH_PAUSE_MS: u64 = 1000;
const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_UPLOAD_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_UPLOAD_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONTENT_SELECTOR: &str =
    "article, main, [role='main'], .article-body, #content, .content";
pub const DEFAULT_LINK_SELECTOR: &str = "main, article, [role='main'], #content, .content";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Runtime configuration for one pipeline run.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    api_key: String,
    source_url: Url,
    ingest_endpoint: Url,
    state_dir: PathBuf,
    max_articles: usize,
    fetch_concurrency: usize,
    batch_max_items: usize,
    batch_max_bytes: usize,
    batch_pause: Duration,
    upload_max_attempts: u32,
    upload_base_delay: Duration,
    upload_max_delay: Duration,
    request_timeout: Duration,
    prune_removed: bool,
    content_selector: String,
    link_selector: String,
    link_pattern: Option<String>,
    log_format: LogFormat,
}

impl Config {
    /// Create a config with defaults for everything except the three values
    /// that have no sensible default in tests.
    pub fn new(api_key: impl Into<String>, source_url: Url, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: api_key.into(),
            source_url,
            ingest_endpoint: Url::parse(DEFAULT_INGEST_ENDPOINT).expect("default endpoint is valid"),
            state_dir: state_dir.into(),
            max_articles: DEFAULT_MAX_ARTICLES,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            batch_max_items: DEFAULT_BATCH_MAX_ITEMS,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
            upload_max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            upload_base_delay: Duration::from_millis(DEFAULT_UPLOAD_BASE_DELAY_MS),
            upload_max_delay: Duration::from_millis(DEFAULT_UPLOAD_MAX_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            prune_removed: true,
            content_selector: DEFAULT_CONTENT_SELECTOR.to_string(),
            link_selector: DEFAULT_LINK_SELECTOR.to_string(),
            link_pattern: None,
            log_format: LogFormat::Text,
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. `from_env` is this with `std::env::var`.
    ///
    /// The credential is checked first so a missing key fails before any other
    /// value is even parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .or_else(|| lookup(ENV_API_KEY_FALLBACK))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingCredential)?;

        let source_url = parse_url(&lookup, ENV_SOURCE_URL, DEFAULT_SOURCE_URL)?;
        let state_dir = lookup(ENV_STATE_DIR).unwrap_or_else(|| DEFAULT_STATE_DIR.to_string());

        let mut config = Self::new(api_key, source_url, state_dir);
        config.ingest_endpoint = parse_url(&lookup, ENV_INGEST_ENDPOINT, DEFAULT_INGEST_ENDPOINT)?;
        config.max_articles = parse_or(&lookup, ENV_MAX_ARTICLES, DEFAULT_MAX_ARTICLES)?;
        config.fetch_concurrency =
            parse_or(&lookup, ENV_FETCH_CONCURRENCY, DEFAULT_FETCH_CONCURRENCY)?;
        config.batch_max_items = parse_or(&lookup, ENV_BATCH_MAX_ITEMS, DEFAULT_BATCH_MAX_ITEMS)?;
        config.batch_max_bytes = parse_or(&lookup, ENV_BATCH_MAX_BYTES, DEFAULT_BATCH_MAX_BYTES)?;
        config.batch_pause = Duration::from_millis(parse_or(
            &lookup,
            ENV_BATCH_PAUSE_MS,
            DEFAULT_BATCH_PAUSE_MS,
        )?);
        config.upload_max_attempts =
            parse_or(&lookup, ENV_UPLOAD_MAX_ATTEMPTS, DEFAULT_UPLOAD_MAX_ATTEMPTS)?;
        config.upload_base_delay = Duration::from_millis(parse_or(
            &lookup,
            ENV_UPLOAD_BASE_DELAY_MS,
            DEFAULT_UPLOAD_BASE_DELAY_MS,
        )?);
        config.upload_max_delay = Duration::from_millis(parse_or(
            &lookup,
            ENV_UPLOAD_MAX_DELAY_MS,
            DEFAULT_UPLOAD_MAX_DELAY_MS,
        )?);
        config.request_timeout = Duration::from_secs(parse_or(
            &lookup,
            ENV_REQUEST_TIMEOUT_SECS,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        config.prune_removed = parse_or(&lookup, ENV_PRUNE_REMOVED, true)?;
        if let Some(selector) = lookup(ENV_CONTENT_SELECTOR) {
            config.content_selector = selector;
        }
        if let Some(selector) = lookup(ENV_LINK_SELECTOR) {
            config.link_selector = selector;
        }
        config.link_pattern = lookup(ENV_LINK_PATTERN).filter(|p| !p.trim().is_empty());
        config.log_format = parse_or(&lookup, ENV_LOG_FORMAT, LogFormat::Text)?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints. Called by `from_lookup`; tests that use
    /// the setters can call it explicitly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        for (field, value) in [
            ("batch_max_items", self.batch_max_items),
            ("batch_max_bytes", self.batch_max_bytes),
            ("fetch_concurrency", self.fetch_concurrency),
            ("upload_max_attempts", self.upload_max_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for (field, selector) in [
            ("content_selector", &self.content_selector),
            ("link_selector", &self.link_selector),
        ] {
            Selector::parse(selector).map_err(|e| ConfigError::InvalidValue {
                field,
                reason: format!("invalid CSS selector: {e}"),
            })?;
        }
        if let Some(pattern) = &self.link_pattern {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                field: "link_pattern",
                reason: e.to_string(),
            })?;
        }
        if !matches!(self.ingest_endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "ingest_endpoint",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_ingest_endpoint(mut self, endpoint: Url) -> Self {
        self.ingest_endpoint = endpoint;
        self
    }

    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles;
        self
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn with_batch_limits(mut self, max_items: usize, max_bytes: usize) -> Self {
        self.batch_max_items = max_items;
        self.batch_max_bytes = max_bytes;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_upload_retry(mut self, max_attempts: u32, base: Duration, max: Duration) -> Self {
        self.upload_max_attempts = max_attempts;
        self.upload_base_delay = base;
        self.upload_max_delay = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_prune_removed(mut self, prune: bool) -> Self {
        self.prune_removed = prune;
        self
    }

    pub fn with_link_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.link_pattern = Some(pattern.into());
        self
    }

    /// Backend credential. Never log this; use [`Config::masked_api_key`].
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Last four characters of the key, for log lines.
    pub fn masked_api_key(&self) -> String {
        let tail: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{tail}")
    }

    /// Index page (or sitemap) the crawl starts from.
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }
    /// Base URL of the ingestion API.
    pub fn ingest_endpoint(&self) -> &Url {
        &self.ingest_endpoint
    }
    /// Directory holding the store, snapshots and run reports.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
    /// Candidate cap after dedup; `None` when unlimited.
    pub fn max_articles(&self) -> Option<usize> {
        (self.max_articles > 0).then_some(self.max_articles)
    }
    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency
    }
    pub fn batch_max_items(&self) -> usize {
        self.batch_max_items
    }
    pub fn batch_max_bytes(&self) -> usize {
        self.batch_max_bytes
    }
    pub fn batch_pause(&self) -> Duration {
        self.batch_pause
    }
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.upload_max_attempts,
            self.upload_base_delay,
            self.upload_max_delay,
        )
    }
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
    pub fn prune_removed(&self) -> bool {
        self.prune_removed
    }
    pub fn content_selector(&self) -> &str {
        &self.content_selector
    }
    pub fn link_selector(&self) -> &str {
        &self.link_selector
    }
    pub fn link_pattern(&self) -> Option<&str> {
        self.link_pattern.as_deref()
    }
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.masked_api_key())
            .field("source_url", &self.source_url.as_str())
            .field("ingest_endpoint", &self.ingest_endpoint.as_str())
            .field("state_dir", &self.state_dir)
            .field("max_articles", &self.max_articles)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("batch_max_items", &self.batch_max_items)
            .field("batch_max_bytes", &self.batch_max_bytes)
            .field("batch_pause", &self.batch_pause)
            .field("upload_max_attempts", &self.upload_max_attempts)
            .field("request_timeout", &self.request_timeout)
            .field("prune_removed", &self.prune_removed)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur while building a configuration. All of them are
/// fatal and surface before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API credential: set {ENV_API_KEY} (or {ENV_API_KEY_FALLBACK})")]
    MissingCredential,

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field: key,
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn parse_url<F>(lookup: &F, key: &'static str, default: &str) -> Result<Url, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        field: key,
        reason: e.to_string(),
    })
}
