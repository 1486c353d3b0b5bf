//! Tracing subscriber setup for MARQUEE binaries.

use crate::error::{CatalogError, CatalogResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVES: &str = "marquee_cache=debug,marquee_catalog=debug,info";

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`.
///
/// Call once at startup, before anything logs.
pub fn init_tracing(service_name: &str) -> CatalogResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| CatalogError::Telemetry {
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(
        service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );

    Ok(())
}
