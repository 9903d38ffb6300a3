//! # Engine Configuration Module
//!
//! Provides configuration for the catalog synchronization engine.
//!
//! ## Overview
//!
//! Configuration is assembled with [`SyncEngineConfig::builder()`]. Every
//! optional setting has a default; the remote base URL and the API key are
//! required. [`SyncEngineConfigBuilder::build`] validates the result and fails
//! fast with an actionable message.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::SyncEngineConfig;
//! use std::time::Duration;
//!
//! let config = SyncEngineConfig::builder()
//!     .base_url("https://media.example.com")
//!     .api_key("0123456789abcdef")
//!     .page_size(200)
//!     .cache_ttl(Duration::from_secs(120))
//!     .build()
//!     .expect("valid configuration");
//!
//! assert_eq!(config.page_size, 200);
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::SyncEngineConfig;
//!
//! // Missing API key
//! let config = SyncEngineConfig::builder()
//!     .base_url("https://media.example.com")
//!     .build()
//!     .expect("Should fail - missing API key");
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use bridge_traits::{MediaKind, RetryPolicy};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_JITTER: Duration = Duration::from_millis(250);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 4;

/// Settings for the catalog sync engine.
///
/// Use [`SyncEngineConfigBuilder`] to construct instances.
#[derive(Clone, PartialEq)]
pub struct SyncEngineConfig {
    /// Remote library base URL, e.g. `https://media.example.com`
    pub base_url: String,

    /// Credential sent with every catalog request
    pub api_key: String,

    /// Items requested per page
    pub page_size: u32,

    /// Upper bound accepted for any page size
    pub max_page_size: u32,

    /// Catalog categories to sync
    pub kinds: BTreeSet<MediaKind>,

    /// Lifetime of a cached page response
    pub cache_ttl: Duration,

    /// Maximum number of cached page responses
    pub cache_capacity: usize,

    /// Total attempts per page request, first one included
    pub retry_attempts: u32,

    /// Delay after the first failed attempt; doubles per attempt
    pub backoff_base: Duration,

    /// Ceiling for a single backoff delay
    pub backoff_max: Duration,

    /// Upper bound of random delay added to each backoff
    pub backoff_jitter: Duration,

    /// Timeout applied to each individual remote call
    pub request_timeout: Duration,

    /// Per-observer buffer of the progress channel
    pub event_buffer_size: usize,

    /// Sessions allowed to run at the same time
    pub max_concurrent_sessions: usize,

    /// SQLite database file. `None` keeps the store in memory.
    pub database_path: Option<PathBuf>,
}

impl fmt::Debug for SyncEngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngineConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_if_sensitive("api_key", &self.api_key))
            .field("page_size", &self.page_size)
            .field("max_page_size", &self.max_page_size)
            .field("kinds", &self.kinds)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .field("retry_attempts", &self.retry_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("backoff_jitter", &self.backoff_jitter)
            .field("request_timeout", &self.request_timeout)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("max_concurrent_sessions", &self.max_concurrent_sessions)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl SyncEngineConfig {
    /// Creates a new builder for constructing a `SyncEngineConfig`.
    pub fn builder() -> SyncEngineConfigBuilder {
        SyncEngineConfigBuilder::default()
    }

    /// Backoff settings as a [`RetryPolicy`].
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            jitter: self.backoff_jitter,
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config(
                "Base URL is required. Use .base_url() to set it.".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if self.api_key.trim().is_empty() {
            return Err(Error::Config(
                "API key is required. Use .api_key() to set it.".to_string(),
            ));
        }

        if self.max_page_size == 0 {
            return Err(Error::Config(
                "Maximum page size must be greater than 0".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > self.max_page_size {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {} (got {})",
                self.max_page_size, self.page_size
            )));
        }

        if self.kinds.is_empty() {
            return Err(Error::Config(
                "At least one media kind must be selected for sync".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(Error::Config(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }

        if self.cache_capacity == 0 {
            return Err(Error::Config(
                "Cache capacity must be greater than 0".to_string(),
            ));
        }

        if self.retry_attempts == 0 || self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(Error::Config(format!(
                "Retry attempts must be between 1 and {} (got {})",
                MAX_RETRY_ATTEMPTS, self.retry_attempts
            )));
        }

        if self.backoff_base > self.backoff_max {
            return Err(Error::Config(format!(
                "Backoff base ({:?}) cannot exceed backoff max ({:?})",
                self.backoff_base, self.backoff_max
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_sessions == 0 {
            return Err(Error::Config(
                "At least one concurrent session must be allowed".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`SyncEngineConfig`] instances.
#[derive(Debug, Default)]
pub struct SyncEngineConfigBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    page_size: Option<u32>,
    max_page_size: Option<u32>,
    kinds: Option<BTreeSet<MediaKind>>,
    cache_ttl: Option<Duration>,
    cache_capacity: Option<usize>,
    retry_attempts: Option<u32>,
    backoff_base: Option<Duration>,
    backoff_max: Option<Duration>,
    backoff_jitter: Option<Duration>,
    request_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
    max_concurrent_sessions: Option<usize>,
    database_path: Option<PathBuf>,
}

impl SyncEngineConfigBuilder {
    /// Sets the remote library base URL. A trailing slash is dropped.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Default: 100
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Default: 500
    pub fn max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = Some(size);
        self
    }

    /// Default: movies and series
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = MediaKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Default: 5 minutes
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = Some(entries);
        self
    }

    /// Default: 3
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn backoff_base(mut self, delay: Duration) -> Self {
        self.backoff_base = Some(delay);
        self
    }

    pub fn backoff_max(mut self, delay: Duration) -> Self {
        self.backoff_max = Some(delay);
        self
    }

    pub fn backoff_jitter(mut self, jitter: Duration) -> Self {
        self.backoff_jitter = Some(jitter);
        self
    }

    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn max_concurrent_sessions(mut self, sessions: usize) -> Self {
        self.max_concurrent_sessions = Some(sessions);
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required value is missing or a value
    /// is out of range.
    pub fn build(self) -> Result<SyncEngineConfig> {
        let config = SyncEngineConfig {
            base_url: self.base_url.unwrap_or_default(),
            api_key: self.api_key.unwrap_or_default(),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            max_page_size: self.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE),
            kinds: self
                .kinds
                .unwrap_or_else(|| MediaKind::ALL.into_iter().collect()),
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
            cache_capacity: self.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            retry_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            backoff_base: self.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE),
            backoff_max: self.backoff_max.unwrap_or(DEFAULT_BACKOFF_MAX),
            backoff_jitter: self.backoff_jitter.unwrap_or(DEFAULT_BACKOFF_JITTER),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            max_concurrent_sessions: self
                .max_concurrent_sessions
                .unwrap_or(DEFAULT_MAX_CONCURRENT_SESSIONS),
            database_path: self.database_path,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_builder() -> SyncEngineConfigBuilder {
        SyncEngineConfig::builder()
            .base_url("https://media.example.com/")
            .api_key("secret-key")
    }

    #[test]
    fn test_builder_defaults() {
        let config = valid_builder().build().unwrap();

        assert_eq!(config.base_url, "https://media.example.com");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_page_size, DEFAULT_MAX_PAGE_SIZE);
        assert_eq!(config.kinds.len(), 2);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_missing_base_url() {
        let result = SyncEngineConfig::builder().api_key("k").build();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Base URL is required"));
    }

    #[test]
    fn test_missing_api_key() {
        let result = SyncEngineConfig::builder()
            .base_url("https://media.example.com")
            .build();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("API key is required"));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let result = valid_builder().base_url("ftp://media.example.com").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(valid_builder().page_size(0).build().is_err());
        assert!(valid_builder()
            .max_page_size(50)
            .page_size(51)
            .build()
            .is_err());
        assert!(valid_builder().max_page_size(50).page_size(50).build().is_ok());
    }

    #[test]
    fn test_empty_kinds_rejected() {
        let result = valid_builder().kinds(Vec::new()).build();
        assert!(result.unwrap_err().to_string().contains("media kind"));
    }

    #[test]
    fn test_retry_bounds() {
        assert!(valid_builder().retry_attempts(0).build().is_err());
        assert!(valid_builder()
            .retry_attempts(MAX_RETRY_ATTEMPTS + 1)
            .build()
            .is_err());
        assert!(valid_builder().retry_attempts(1).build().is_ok());
    }

    #[test]
    fn test_backoff_base_cannot_exceed_max() {
        let result = valid_builder()
            .backoff_base(Duration::from_secs(10))
            .backoff_max(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(valid_builder().cache_ttl(Duration::ZERO).build().is_err());
        assert!(valid_builder()
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_retry_policy_projection() {
        let config = valid_builder()
            .retry_attempts(5)
            .backoff_base(Duration::from_millis(10))
            .backoff_max(Duration::from_millis(80))
            .backoff_jitter(Duration::ZERO)
            .build()
            .unwrap();

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(80));
        assert_eq!(policy.jitter, Duration::ZERO);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = valid_builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
