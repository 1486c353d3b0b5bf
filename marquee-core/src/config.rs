//! Engine configuration

use crate::constants::*;
use crate::{ConfigError, MarqueeError, MarqueeResult, SortStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the pagination and caching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    // Pagination
    pub default_page_size: usize,
    pub max_page_size: usize,

    // Warming
    pub warm_target_size: usize,
    /// Base page depth of a full warm. Expansion levels build on top of it.
    pub warm_max_pages: u32,
    pub quick_fetch_pages: u32,
    /// Throttle between upstream calls. Never skipped under load.
    pub page_delay: Duration,
    pub max_consecutive_failures: u32,
    pub max_consecutive_empty_pages: u32,

    // Freshness
    pub date_refresh_interval: Duration,
    pub popularity_refresh_interval: Duration,
    pub eviction_age: Duration,
    pub sweep_interval: Duration,

    // Expansion
    pub expansion_buffer_pages: usize,
    pub expansion_step_pages: u32,
    pub max_expansion_level: u32,
    pub expansion_ttl: Duration,

    // Release windows
    pub upcoming_window_days: i64,
    pub recent_window_days: i64,
    pub region: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            warm_target_size: DEFAULT_WARM_TARGET_SIZE,
            warm_max_pages: DEFAULT_WARM_MAX_PAGES,
            quick_fetch_pages: DEFAULT_QUICK_FETCH_PAGES,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_consecutive_empty_pages: DEFAULT_MAX_CONSECUTIVE_EMPTY_PAGES,
            date_refresh_interval: Duration::from_secs(DEFAULT_DATE_REFRESH_SECS),
            popularity_refresh_interval: Duration::from_secs(DEFAULT_POPULARITY_REFRESH_SECS),
            eviction_age: Duration::from_secs(DEFAULT_EVICTION_AGE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            expansion_buffer_pages: DEFAULT_EXPANSION_BUFFER_PAGES,
            expansion_step_pages: DEFAULT_EXPANSION_STEP_PAGES,
            max_expansion_level: DEFAULT_MAX_EXPANSION_LEVEL,
            expansion_ttl: Duration::from_secs(DEFAULT_EXPANSION_TTL_SECS),
            upcoming_window_days: DEFAULT_UPCOMING_WINDOW_DAYS,
            recent_window_days: DEFAULT_RECENT_WINDOW_DAYS,
            region: None,
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full-warm target size and base page depth.
    pub fn with_warm_target(mut self, target_size: usize, max_pages: u32) -> Self {
        self.warm_target_size = target_size;
        self.warm_max_pages = max_pages;
        self
    }

    /// Set the quick-fetch depth used on a cold cache.
    pub fn with_quick_fetch_pages(mut self, pages: u32) -> Self {
        self.quick_fetch_pages = pages;
        self
    }

    /// Set the delay between upstream calls.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Set both refresh intervals.
    pub fn with_refresh_intervals(mut self, date: Duration, popularity: Duration) -> Self {
        self.date_refresh_interval = date;
        self.popularity_refresh_interval = popularity;
        self
    }

    /// Set the expansion policy.
    pub fn with_expansion(mut self, step_pages: u32, max_level: u32, ttl: Duration) -> Self {
        self.expansion_step_pages = step_pages;
        self.max_expansion_level = max_level;
        self.expansion_ttl = ttl;
        self
    }

    /// Set the proactive expansion buffer, in pages.
    pub fn with_expansion_buffer(mut self, pages: usize) -> Self {
        self.expansion_buffer_pages = pages;
        self
    }

    /// Set the failure budgets of a fetch pass.
    pub fn with_failure_budget(mut self, failures: u32, empty_pages: u32) -> Self {
        self.max_consecutive_failures = failures;
        self.max_consecutive_empty_pages = empty_pages;
        self
    }

    /// Set the sweeper's eviction age.
    pub fn with_eviction_age(mut self, age: Duration) -> Self {
        self.eviction_age = age;
        self
    }

    /// Set the region passed to the upstream.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Refresh interval for collections ordered by `sort`.
    pub fn refresh_interval_for(&self, sort: SortStrategy) -> Duration {
        if sort.is_date_sensitive() {
            self.date_refresh_interval
        } else {
            self.popularity_refresh_interval
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(MarqueeError::Config) if invalid.
    pub fn validate(&self) -> MarqueeResult<()> {
        if self.default_page_size == 0 {
            return Err(invalid(
                "default_page_size",
                self.default_page_size.to_string(),
                "default_page_size must be greater than 0",
            ));
        }

        if self.max_page_size < self.default_page_size {
            return Err(invalid(
                "max_page_size",
                self.max_page_size.to_string(),
                "max_page_size must be at least default_page_size",
            ));
        }

        if self.warm_target_size == 0 {
            return Err(invalid(
                "warm_target_size",
                self.warm_target_size.to_string(),
                "warm_target_size must be greater than 0",
            ));
        }

        if self.warm_max_pages == 0 {
            return Err(invalid(
                "warm_max_pages",
                self.warm_max_pages.to_string(),
                "warm_max_pages must be greater than 0",
            ));
        }

        if self.quick_fetch_pages == 0 || self.quick_fetch_pages > self.warm_max_pages {
            return Err(invalid(
                "quick_fetch_pages",
                self.quick_fetch_pages.to_string(),
                "quick_fetch_pages must be between 1 and warm_max_pages",
            ));
        }

        if self.max_consecutive_failures == 0 {
            return Err(invalid(
                "max_consecutive_failures",
                self.max_consecutive_failures.to_string(),
                "max_consecutive_failures must be greater than 0",
            ));
        }

        if self.max_consecutive_empty_pages == 0 {
            return Err(invalid(
                "max_consecutive_empty_pages",
                self.max_consecutive_empty_pages.to_string(),
                "max_consecutive_empty_pages must be greater than 0",
            ));
        }

        for (field, value) in [
            ("date_refresh_interval", self.date_refresh_interval),
            ("popularity_refresh_interval", self.popularity_refresh_interval),
            ("eviction_age", self.eviction_age),
            ("sweep_interval", self.sweep_interval),
            ("expansion_ttl", self.expansion_ttl),
        ] {
            if value.is_zero() {
                return Err(invalid(field, format!("{:?}", value), "duration must be positive"));
            }
        }

        if self.expansion_step_pages == 0 {
            return Err(invalid(
                "expansion_step_pages",
                self.expansion_step_pages.to_string(),
                "expansion_step_pages must be greater than 0",
            ));
        }

        for (field, days) in [
            ("upcoming_window_days", self.upcoming_window_days),
            ("recent_window_days", self.recent_window_days),
        ] {
            if !(1..=MAX_WINDOW_DAYS).contains(&days) {
                return Err(invalid(
                    field,
                    days.to_string(),
                    &format!("release windows must span 1 to {} days", MAX_WINDOW_DAYS),
                ));
            }
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MARQUEE_PAGE_SIZE`, `MARQUEE_MAX_PAGE_SIZE`
    /// - `MARQUEE_WARM_TARGET_SIZE`, `MARQUEE_WARM_MAX_PAGES`, `MARQUEE_QUICK_FETCH_PAGES`
    /// - `MARQUEE_PAGE_DELAY_MS`
    /// - `MARQUEE_MAX_CONSECUTIVE_FAILURES`, `MARQUEE_MAX_CONSECUTIVE_EMPTY_PAGES`
    /// - `MARQUEE_DATE_REFRESH_SECS`, `MARQUEE_POPULARITY_REFRESH_SECS`
    /// - `MARQUEE_EVICTION_AGE_SECS`, `MARQUEE_SWEEP_INTERVAL_SECS`
    /// - `MARQUEE_EXPANSION_BUFFER_PAGES`, `MARQUEE_EXPANSION_STEP_PAGES`
    /// - `MARQUEE_MAX_EXPANSION_LEVEL`, `MARQUEE_EXPANSION_TTL_SECS`
    /// - `MARQUEE_UPCOMING_WINDOW_DAYS`, `MARQUEE_RECENT_WINDOW_DAYS`
    /// - `MARQUEE_REGION`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_page_size: env_or("MARQUEE_PAGE_SIZE", defaults.default_page_size),
            max_page_size: env_or("MARQUEE_MAX_PAGE_SIZE", defaults.max_page_size),
            warm_target_size: env_or("MARQUEE_WARM_TARGET_SIZE", defaults.warm_target_size),
            warm_max_pages: env_or("MARQUEE_WARM_MAX_PAGES", defaults.warm_max_pages),
            quick_fetch_pages: env_or("MARQUEE_QUICK_FETCH_PAGES", defaults.quick_fetch_pages),
            page_delay: Duration::from_millis(env_or(
                "MARQUEE_PAGE_DELAY_MS",
                DEFAULT_PAGE_DELAY_MS,
            )),
            max_consecutive_failures: env_or(
                "MARQUEE_MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            ),
            max_consecutive_empty_pages: env_or(
                "MARQUEE_MAX_CONSECUTIVE_EMPTY_PAGES",
                defaults.max_consecutive_empty_pages,
            ),
            date_refresh_interval: Duration::from_secs(env_or(
                "MARQUEE_DATE_REFRESH_SECS",
                DEFAULT_DATE_REFRESH_SECS,
            )),
            popularity_refresh_interval: Duration::from_secs(env_or(
                "MARQUEE_POPULARITY_REFRESH_SECS",
                DEFAULT_POPULARITY_REFRESH_SECS,
            )),
            eviction_age: Duration::from_secs(env_or(
                "MARQUEE_EVICTION_AGE_SECS",
                DEFAULT_EVICTION_AGE_SECS,
            )),
            sweep_interval: Duration::from_secs(env_or(
                "MARQUEE_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            expansion_buffer_pages: env_or(
                "MARQUEE_EXPANSION_BUFFER_PAGES",
                defaults.expansion_buffer_pages,
            ),
            expansion_step_pages: env_or(
                "MARQUEE_EXPANSION_STEP_PAGES",
                defaults.expansion_step_pages,
            ),
            max_expansion_level: env_or(
                "MARQUEE_MAX_EXPANSION_LEVEL",
                defaults.max_expansion_level,
            ),
            expansion_ttl: Duration::from_secs(env_or(
                "MARQUEE_EXPANSION_TTL_SECS",
                DEFAULT_EXPANSION_TTL_SECS,
            )),
            upcoming_window_days: env_or(
                "MARQUEE_UPCOMING_WINDOW_DAYS",
                defaults.upcoming_window_days,
            ),
            recent_window_days: env_or("MARQUEE_RECENT_WINDOW_DAYS", defaults.recent_window_days),
            region: std::env::var("MARQUEE_REGION")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_refresh_interval_by_sort() {
        let config = EngineConfig::default();
        assert_eq!(
            config.refresh_interval_for(SortStrategy::ReleaseDateAsc),
            Duration::from_secs(900)
        );
        assert_eq!(
            config.refresh_interval_for(SortStrategy::QualityDesc),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let config = EngineConfig {
            default_page_size: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            MarqueeError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "default_page_size"
        ));
    }

    #[test]
    fn test_validate_rejects_quick_fetch_deeper_than_warm() {
        let config = EngineConfig::default()
            .with_warm_target(100, 4)
            .with_quick_fetch_pages(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_expansion_ttl() {
        let config = EngineConfig::default().with_expansion(10, 3, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_release_windows() {
        let huge = EngineConfig {
            upcoming_window_days: i64::MAX / 2,
            ..EngineConfig::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(matches!(
            err,
            MarqueeError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "upcoming_window_days"
        ));

        let empty = EngineConfig {
            recent_window_days: 0,
            ..EngineConfig::default()
        };
        assert!(empty.validate().is_err());

        let widest = EngineConfig {
            upcoming_window_days: MAX_WINDOW_DAYS,
            recent_window_days: MAX_WINDOW_DAYS,
            ..EngineConfig::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_warm_target(60, 3)
            .with_quick_fetch_pages(1)
            .with_page_delay(Duration::ZERO)
            .with_expansion(2, 4, Duration::from_secs(30))
            .with_expansion_buffer(1)
            .with_failure_budget(2, 5)
            .with_region("GB");

        assert_eq!(config.warm_target_size, 60);
        assert_eq!(config.warm_max_pages, 3);
        assert_eq!(config.quick_fetch_pages, 1);
        assert_eq!(config.page_delay, Duration::ZERO);
        assert_eq!(config.expansion_step_pages, 2);
        assert_eq!(config.max_expansion_level, 4);
        assert_eq!(config.expansion_buffer_pages, 1);
        assert_eq!(config.max_consecutive_failures, 2);
        assert_eq!(config.max_consecutive_empty_pages, 5);
        assert_eq!(config.region.as_deref(), Some("GB"));
        assert!(config.validate().is_ok());
    }
}
