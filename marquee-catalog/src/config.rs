//! Catalog API configuration

use marquee_core::{CacheKey, ConfigError, MarqueeError, MarqueeResult, ValidationError};
use std::time::Duration;

/// Public endpoint of the catalog API.
pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default response language.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default number of release-date lookups in flight per page.
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 8;

/// How long a known digital release date is reused (6 hours).
pub const DEFAULT_LOOKUP_CACHE_TTL_SECS: u64 = 6 * 60 * 60;

/// How long "no digital release yet" is reused (5 minutes). Kept under the
/// date-sorted refresh interval so a refresh sees newly announced dates.
pub const DEFAULT_LOOKUP_MISS_TTL_SECS: u64 = 5 * 60;

/// Connection settings for the catalog API plus the keys warmed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub language: String,
    /// Concurrent per-title lookups while enriching one page.
    pub lookup_concurrency: usize,
    /// Country whose release calendar is consulted for digital dates.
    /// `None` takes the earliest digital release anywhere.
    pub lookup_region: Option<String>,
    /// Lifetime of a cached digital release date.
    pub lookup_cache_ttl: Duration,
    /// Lifetime of a cached lookup that found no digital release.
    pub lookup_miss_ttl: Duration,
    pub preload_keys: Vec<CacheKey>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            language: DEFAULT_LANGUAGE.to_string(),
            lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            lookup_region: None,
            lookup_cache_ttl: Duration::from_secs(DEFAULT_LOOKUP_CACHE_TTL_SECS),
            lookup_miss_ttl: Duration::from_secs(DEFAULT_LOOKUP_MISS_TTL_SECS),
            preload_keys: CacheKey::default_preload_set(),
        }
    }
}

impl CatalogConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lookup_concurrency(mut self, concurrency: usize) -> Self {
        self.lookup_concurrency = concurrency;
        self
    }

    pub fn with_lookup_region(mut self, region: impl Into<String>) -> Self {
        self.lookup_region = Some(region.into());
        self
    }

    pub fn with_lookup_ttls(mut self, found: Duration, missing: Duration) -> Self {
        self.lookup_cache_ttl = found;
        self.lookup_miss_ttl = missing;
        self
    }

    pub fn with_preload_keys(mut self, keys: Vec<CacheKey>) -> Self {
        self.preload_keys = keys;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MarqueeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(MarqueeError::Config(ConfigError::MissingRequired {
                field: "api_key".to_string(),
            }));
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid(
                "base_url",
                self.base_url.clone(),
                "base_url must be an http(s) URL",
            ));
        }

        if self.timeout.is_zero() {
            return Err(invalid(
                "timeout",
                format!("{:?}", self.timeout),
                "timeout must be positive",
            ));
        }

        if self.lookup_concurrency == 0 {
            return Err(invalid(
                "lookup_concurrency",
                self.lookup_concurrency.to_string(),
                "lookup_concurrency must be greater than 0",
            ));
        }

        if self.lookup_cache_ttl.is_zero() || self.lookup_miss_ttl.is_zero() {
            return Err(invalid(
                "lookup_ttl",
                format!("{:?}/{:?}", self.lookup_cache_ttl, self.lookup_miss_ttl),
                "lookup cache lifetimes must be positive",
            ));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MARQUEE_CATALOG_API_KEY` (falls back to `TMDB_API_KEY`)
    /// - `MARQUEE_CATALOG_BASE_URL`
    /// - `MARQUEE_CATALOG_TIMEOUT_SECS`
    /// - `MARQUEE_CATALOG_LANGUAGE`
    /// - `MARQUEE_LOOKUP_CONCURRENCY`
    /// - `MARQUEE_LOOKUP_REGION`
    /// - `MARQUEE_LOOKUP_CACHE_TTL_SECS`, `MARQUEE_LOOKUP_MISS_TTL_SECS`
    /// - `MARQUEE_PRELOAD_KEYS`: comma-separated `kind/sort/filter` keys
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let preload_keys = match std::env::var("MARQUEE_PRELOAD_KEYS") {
            Ok(raw) if !raw.trim().is_empty() => match parse_key_list(&raw) {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring MARQUEE_PRELOAD_KEYS");
                    defaults.preload_keys.clone()
                }
            },
            _ => defaults.preload_keys.clone(),
        };

        Self {
            base_url: non_blank("MARQUEE_CATALOG_BASE_URL").unwrap_or(defaults.base_url),
            api_key: non_blank("MARQUEE_CATALOG_API_KEY")
                .or_else(|| non_blank("TMDB_API_KEY"))
                .unwrap_or_default(),
            timeout: Duration::from_secs(
                std::env::var("MARQUEE_CATALOG_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            language: non_blank("MARQUEE_CATALOG_LANGUAGE").unwrap_or(defaults.language),
            lookup_concurrency: std::env::var("MARQUEE_LOOKUP_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lookup_concurrency),
            lookup_region: non_blank("MARQUEE_LOOKUP_REGION"),
            lookup_cache_ttl: Duration::from_secs(secs_or(
                "MARQUEE_LOOKUP_CACHE_TTL_SECS",
                DEFAULT_LOOKUP_CACHE_TTL_SECS,
            )),
            lookup_miss_ttl: Duration::from_secs(secs_or(
                "MARQUEE_LOOKUP_MISS_TTL_SECS",
                DEFAULT_LOOKUP_MISS_TTL_SECS,
            )),
            preload_keys,
        }
    }
}

/// Parse a comma-separated list of cache keys, skipping blank entries.
pub fn parse_key_list(raw: &str) -> Result<Vec<CacheKey>, ValidationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

fn secs_or(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn non_blank(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn invalid(field: &str, value: String, reason: &str) -> MarqueeError {
    MarqueeError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
