//! Sorted-collection pagination and caching engine.
//!
//! Turns a slow, rate-limited, page-based upstream catalog into stable
//! paginated collections with "load more" semantics.
//!
//! # Design Philosophy
//!
//! A collection is built once from many small upstream fetches, kept sorted
//! and deduplicated, and then sliced per request. Requests never block on a
//! full rebuild: a cold key answers from a quick fetch, a stale key answers
//! from stale data, and a key nearing its end grows before the client gets
//! there.
//!
//! # Concurrency
//!
//! All mutation is keyed by [`CacheKey`]. The [`InFlightRegistry`] allows at
//! most one refresh and one expansion per key; later callers either await
//! the running task or move on with what is cached.
//!
//! # Example
//!
//! ```ignore
//! let service = PaginationService::new(config, store, upstream, processor, filters, clock)?;
//!
//! let first = service.get_page(PageRequest::new(key, 1, 20)).await?;
//! let second = service
//!     .get_page(PageRequest::new(key, 2, 20).excluding(first.ids()))
//!     .await?;
//! ```
//!
//! [`CacheKey`]: marquee_core::CacheKey

pub mod dedup;
pub mod expander;
pub mod extract;
pub mod fetch;
pub mod inflight;
pub mod service;
pub mod sort;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod warmer;

pub use dedup::{dedupe, dedupe_against, find_duplicate_ids, id_index};
pub use expander::Expander;
pub use extract::{extract_page, PageExtract};
pub use fetch::{AbortReason, FetchOutcome, FetchPlan, PageFetcher};
pub use inflight::{Claim, InFlightGuard, InFlightRegistry, InFlightWaiter, TaskKind, TaskOutcome};
pub use service::PaginationService;
pub use sort::{compare_items, is_sorted, sort_items};
pub use stats::{CollectionState, EngineStats, KeyFreshness};
pub use store::{CollectionMetadata, CollectionSnapshot, CollectionStore, ExpansionBatch, WarmedCollection};
pub use sweeper::{stale_sweep_task, SweepMetrics, SweepSnapshot};
pub use warmer::Warmer;
