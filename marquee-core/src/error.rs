//! Error types for MARQUEE operations

use thiserror::Error;

/// Upstream catalog errors. A single page failing is not fatal to a pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream request for page {page} failed with status {status}: {message}")]
    RequestFailed {
        page: u32,
        status: u16,
        message: String,
    },

    #[error("Rate limited by upstream, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid response from upstream: {reason}")]
    InvalidResponse { reason: String },

    #[error("Transport error talking to upstream: {reason}")]
    Transport { reason: String },

    #[error("Enrichment failed: {reason}")]
    EnrichmentFailed { reason: String },
}

/// Collection store and pagination errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("Collection unavailable for {key}: {reason}")]
    Unavailable { key: String, reason: String },

    #[error("Collection store lock poisoned")]
    LockPoisoned,

    #[error("Background task for {key} ended without reporting: {task}")]
    TaskAbandoned { key: String, task: String },
}

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all MARQUEE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarqueeError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MarqueeError {
    /// True when the error means the caller got no collection at all, as
    /// opposed to a short or degraded page.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            MarqueeError::Collection(CollectionError::Unavailable { .. })
        )
    }
}

/// Result type alias for MARQUEE operations.
pub type MarqueeResult<T> = Result<T, MarqueeError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_display_request_failed() {
        let err = UpstreamError::RequestFailed {
            page: 4,
            status: 503,
            message: "unavailable".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("page 4"));
        assert!(msg.contains("503"));
        assert!(msg.contains("unavailable"));
    }

    #[test]
    fn test_upstream_error_display_rate_limited() {
        let err = UpstreamError::RateLimited {
            retry_after_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Rate limited"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_collection_error_display_unavailable() {
        let err = CollectionError::Unavailable {
            key: "upcoming/release_date_asc/all".to_string(),
            reason: "quick fetch failed".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("upcoming/release_date_asc/all"));
        assert!(msg.contains("quick fetch failed"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "default_page_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("default_page_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_marquee_error_from_variants() {
        let upstream = MarqueeError::from(UpstreamError::Transport {
            reason: "reset".to_string(),
        });
        assert!(matches!(upstream, MarqueeError::Upstream(_)));

        let collection = MarqueeError::from(CollectionError::LockPoisoned);
        assert!(matches!(collection, MarqueeError::Collection(_)));
        assert!(!collection.is_unavailable());

        let unavailable = MarqueeError::from(CollectionError::Unavailable {
            key: "k".to_string(),
            reason: "r".to_string(),
        });
        assert!(unavailable.is_unavailable());

        let validation = MarqueeError::from(ValidationError::RequiredFieldMissing {
            field: "page".to_string(),
        });
        assert!(matches!(validation, MarqueeError::Validation(_)));

        let config = MarqueeError::from(ConfigError::MissingRequired {
            field: "api_key".to_string(),
        });
        assert!(matches!(config, MarqueeError::Config(_)));
    }
}
