//! Error types for the catalog crate and the preload binary

use marquee_core::MarqueeError;
use thiserror::Error;

/// Errors raised while wiring the engine to the real catalog.
///
/// Engine errors pass through unchanged; the rest are process-level failures
/// that only the binary cares about.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Engine(#[from] MarqueeError),

    #[error("Failed to build HTTP client: {reason}")]
    ClientBuild { reason: String },

    #[error("Failed to initialize tracing: {reason}")]
    Telemetry { reason: String },

    #[error("Runtime error: {reason}")]
    Runtime { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::ConfigError;

    #[test]
    fn test_engine_error_is_transparent() {
        let err = CatalogError::from(MarqueeError::Config(ConfigError::MissingRequired {
            field: "api_key".to_string(),
        }));
        let msg = err.to_string();
        assert!(msg.starts_with("Config error"));
        assert!(msg.contains("api_key"));
    }

    #[test]
    fn test_runtime_error_display() {
        let err = CatalogError::Runtime {
            reason: "sweeper panicked".to_string(),
        };
        assert_eq!(err.to_string(), "Runtime error: sweeper panicked");
    }
}
