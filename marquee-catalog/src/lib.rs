//! MARQUEE Catalog - Real Collaborators
//!
//! Plugs the movie catalog API into the pagination engine:
//! - [`TmdbClient`]: discover listing and release calendar over HTTP
//! - [`ReleaseDateProcessor`]: display dates, quality scores, cached lookups
//! - [`CatalogFilterProvider`]: release-window and genre filters per key
//! - [`init_tracing`]: JSON logging for the preload binary

pub mod config;
pub mod error;
pub mod filters;
pub mod processor;
pub mod telemetry;
pub mod tmdb;

pub use config::{parse_key_list, CatalogConfig};
pub use error::{CatalogError, CatalogResult};
pub use filters::{AllOf, CatalogFilterProvider, FollowableWindow, GenreMatch};
pub use processor::{display_date, uses_digital_dates, ReleaseDateLookup, ReleaseDateProcessor};
pub use telemetry::{init_tracing, DEFAULT_LOG_DIRECTIVES};
pub use tmdb::TmdbClient;

use marquee_cache::PaginationService;
use marquee_core::{Clock, EngineConfig, ItemProcessor, SystemClock, UpstreamClient};
use std::sync::Arc;

/// Compose the engine over the real catalog API.
pub fn build_service(
    engine: EngineConfig,
    catalog: &CatalogConfig,
) -> CatalogResult<PaginationService> {
    let client = Arc::new(TmdbClient::new(catalog)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let processor = ReleaseDateProcessor::new(client.clone(), catalog.lookup_concurrency)
        .with_clock(clock.clone())
        .with_cache_ttls(catalog.lookup_cache_ttl, catalog.lookup_miss_ttl);
    build_service_with(engine, client, Arc::new(processor), clock)
}

/// Compose the engine with catalog filters over any upstream and processor.
pub fn build_service_with(
    engine: EngineConfig,
    upstream: Arc<dyn UpstreamClient>,
    processor: Arc<dyn ItemProcessor>,
    clock: Arc<dyn Clock>,
) -> CatalogResult<PaginationService> {
    let filters = CatalogFilterProvider::new(Arc::new(engine.clone()));
    let service = PaginationService::new(engine, upstream, processor, Arc::new(filters), clock)?;
    Ok(service)
}
