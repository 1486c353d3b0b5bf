//! MARQUEE Test Utilities
//!
//! Centralized test infrastructure for the MARQUEE workspace:
//! - Mock upstream catalog with call counting and scripted failures
//! - Pass-through item processor and manual clock
//! - Fixtures for catalog items
//! - Proptest generators

pub use marquee_core::{
    AcceptAll, CacheKey, CatalogItem, Clock, CollectionKind, EngineConfig, FilterProvider,
    FilterSignature, ItemFilter, ItemId, ItemProcessor, MarqueeError, MarqueeResult, PageRequest,
    PageResult, RawItem, SortStrategy, Timestamp, UpstreamClient, UpstreamError, UpstreamPage,
    UpstreamRequest,
};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// FIXTURES
// ============================================================================

/// Base date fixtures count release dates from.
pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid fixture date")
}

/// A raw item whose fields are all derived from its id.
///
/// Release dates advance one day per id, popularity falls as ids grow, so
/// every sort strategy yields a different but predictable order.
pub fn raw_item(id: ItemId) -> RawItem {
    RawItem {
        id,
        title: format!("Title {}", id),
        poster_path: Some(format!("/poster/{}.jpg", id)),
        release_date: Some(base_date() + chrono::Duration::days(id as i64)),
        popularity: Some(1000.0 / (id as f64 + 1.0)),
        vote_average: Some(5.0 + (id % 5) as f64),
        vote_count: Some((id * 3) as u32),
        genre_ids: vec![if id % 2 == 0 { 28 } else { 35 }],
    }
}

/// Raw items for ids `1..=count`.
pub fn raw_items(count: u64) -> Vec<RawItem> {
    (1..=count).map(raw_item).collect()
}

/// Enriched item for `id`.
pub fn catalog_item(id: ItemId) -> CatalogItem {
    CatalogItem::from_raw(raw_item(id))
}

/// Enriched items for ids `1..=count`, in id order.
pub fn catalog_items(count: u64) -> Vec<CatalogItem> {
    (1..=count).map(catalog_item).collect()
}

/// A cache key used across engine tests.
pub fn upcoming_key() -> CacheKey {
    CacheKey::new(
        CollectionKind::Upcoming,
        SortStrategy::ReleaseDateAsc,
        FilterSignature::All,
    )
}

/// Engine config tuned for tests: no inter-page delay, small pages.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_page_delay(Duration::ZERO)
        .with_warm_target(60, 3)
        .with_quick_fetch_pages(1)
        .with_expansion(2, 3, Duration::from_secs(600))
}

// ============================================================================
// MOCK UPSTREAM
// ============================================================================

/// Scripted behavior for a single upstream page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageScript {
    /// Return no items, keeping the real `total_pages`.
    Empty,
    /// Fail with the given error.
    Fail(UpstreamError),
}

/// In-memory upstream catalog serving a fixed item list in fixed-size pages.
///
/// Counts every call so tests can assert how much upstream work happened.
#[derive(Debug)]
pub struct MockUpstream {
    catalog: Vec<RawItem>,
    per_page: usize,
    reported_total_pages: Option<u32>,
    latency: Duration,
    scripts: Mutex<HashMap<u32, PageScript>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<u32>>,
}

impl MockUpstream {
    pub fn new(catalog: Vec<RawItem>, per_page: usize) -> Self {
        Self {
            catalog,
            per_page: per_page.max(1),
            reported_total_pages: None,
            latency: Duration::ZERO,
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Catalog of ids `1..=count` served `per_page` at a time.
    pub fn with_items(count: u64, per_page: usize) -> Self {
        Self::new(raw_items(count), per_page)
    }

    /// Delay every response, making in-flight windows observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Lie about the page count, as real upstreams sometimes do.
    pub fn with_reported_total_pages(mut self, total: u32) -> Self {
        self.reported_total_pages = Some(total);
        self
    }

    /// Script the behavior of `page`.
    pub fn script(self, page: u32, script: PageScript) -> Self {
        self.set_script(page, script);
        self
    }

    /// Script the behavior of `page` on a shared instance.
    pub fn set_script(&self, page: u32, script: PageScript) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(page, script);
    }

    /// Remove every scripted page.
    pub fn clear_scripts(&self) {
        self.scripts.lock().expect("scripts lock").clear();
    }

    /// Number of `fetch_page` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Page numbers requested, in call order.
    pub fn requested_pages(&self) -> Vec<u32> {
        self.requested.lock().expect("requested lock").clone()
    }

    fn real_total_pages(&self) -> u32 {
        self.catalog.len().div_ceil(self.per_page) as u32
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn fetch_page(&self, request: &UpstreamRequest) -> Result<UpstreamPage, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("requested lock")
            .push(request.page);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let total_pages = self
            .reported_total_pages
            .unwrap_or_else(|| self.real_total_pages());

        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get(&request.page)
            .cloned();
        match script {
            Some(PageScript::Fail(err)) => return Err(err),
            Some(PageScript::Empty) => {
                return Ok(UpstreamPage {
                    items: Vec::new(),
                    total_pages,
                })
            }
            None => {}
        }

        let start = (request.page.saturating_sub(1) as usize) * self.per_page;
        let items = self
            .catalog
            .iter()
            .skip(start)
            .take(self.per_page)
            .cloned()
            .collect();

        Ok(UpstreamPage { items, total_pages })
    }
}

/// Convenience error for scripted failures.
pub fn server_error(page: u32) -> UpstreamError {
    UpstreamError::RequestFailed {
        page,
        status: 500,
        message: "scripted failure".to_string(),
    }
}

// ============================================================================
// MOCK PROCESSOR AND CLOCK
// ============================================================================

/// Processor that enriches without lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl ItemProcessor for PassthroughProcessor {
    async fn enrich(
        &self,
        _kind: CollectionKind,
        raw: Vec<RawItem>,
    ) -> Result<Vec<CatalogItem>, UpstreamError> {
        Ok(raw.into_iter().map(CatalogItem::from_raw).collect())
    }
}

/// Filter provider returning a fixed predicate per key, [`AcceptAll`] otherwise.
#[derive(Default)]
pub struct StaticFilters {
    filters: HashMap<CacheKey, std::sync::Arc<dyn ItemFilter>>,
}

impl StaticFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: CacheKey, filter: impl ItemFilter + 'static) -> Self {
        self.filters.insert(key, std::sync::Arc::new(filter));
        self
    }
}

impl FilterProvider for StaticFilters {
    fn filter_for(&self, key: &CacheKey, _today: NaiveDate) -> std::sync::Arc<dyn ItemFilter> {
        self.filters
            .get(key)
            .cloned()
            .unwrap_or_else(|| std::sync::Arc::new(AcceptAll))
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at midnight of [`base_date`].
    pub fn at_base() -> Self {
        Self::new(
            Utc.from_utc_datetime(
                &base_date()
                    .and_hms_opt(0, 0, 0)
                    .expect("valid fixture time"),
            ),
        )
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += chrono::Duration::from_std(by).expect("duration in range");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("clock lock")
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for catalog types.

    use super::*;
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;

    /// Generate any sort strategy.
    pub fn arb_sort_strategy() -> impl Strategy<Value = SortStrategy> {
        prop_oneof![
            Just(SortStrategy::ReleaseDateAsc),
            Just(SortStrategy::ReleaseDateDesc),
            Just(SortStrategy::PopularityDesc),
            Just(SortStrategy::QualityDesc),
        ]
    }

    /// Generate a catalog item with the given id. Sortable fields are
    /// sometimes missing and drawn from small ranges so ties are common.
    pub fn arb_catalog_item_with_id(id: ItemId) -> impl Strategy<Value = CatalogItem> {
        (
            proptest::option::of(0i64..30),
            proptest::option::of(0u8..10),
            proptest::option::of(0u8..10),
        )
            .prop_map(move |(day, popularity, rating)| {
                let date = day.map(|d| base_date() + chrono::Duration::days(d));
                let popularity = popularity.map(f64::from);
                let rating = rating.map(f64::from);
                CatalogItem {
                    id,
                    title: format!("Title {}", id),
                    image_ref: None,
                    release_date: date,
                    digital_release_date: None,
                    display_date: date,
                    popularity,
                    rating,
                    vote_count: 0,
                    quality_score: marquee_core::compute_quality_score(rating, popularity),
                    genre_ids: vec![],
                }
            })
    }

    /// Generate a list of items with pairwise distinct ids, in arbitrary order.
    pub fn arb_unique_items(max_len: usize) -> impl Strategy<Value = Vec<CatalogItem>> {
        btree_set(1u64..10_000, 0..=max_len)
            .prop_flat_map(|ids| {
                let items: Vec<_> = ids.into_iter().map(arb_catalog_item_with_id).collect();
                items
            })
            .prop_shuffle()
    }

    /// Generate a list of item ids that may repeat.
    pub fn arb_ids_with_repeats(max_len: usize) -> impl Strategy<Value = Vec<ItemId>> {
        vec(1u64..50, 0..=max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_upstream_pages_and_counts() {
        let upstream = MockUpstream::with_items(45, 20);
        let request = |page| UpstreamRequest {
            sort_hint: "popularity.desc",
            page,
            window: Default::default(),
        };

        let first = upstream.fetch_page(&request(1)).await.unwrap();
        assert_eq!(first.items.len(), 20);
        assert_eq!(first.total_pages, 3);

        let last = upstream.fetch_page(&request(3)).await.unwrap();
        assert_eq!(last.items.len(), 5);

        let beyond = upstream.fetch_page(&request(4)).await.unwrap();
        assert!(beyond.items.is_empty());

        assert_eq!(upstream.calls(), 3);
        assert_eq!(upstream.requested_pages(), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_mock_upstream_scripts() {
        let upstream = MockUpstream::with_items(40, 10)
            .script(1, PageScript::Empty)
            .script(2, PageScript::Fail(server_error(2)));
        let request = |page| UpstreamRequest {
            sort_hint: "popularity.desc",
            page,
            window: Default::default(),
        };

        assert!(upstream.fetch_page(&request(1)).await.unwrap().items.is_empty());
        assert!(upstream.fetch_page(&request(2)).await.is_err());
        assert_eq!(upstream.fetch_page(&request(3)).await.unwrap().items.len(), 10);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_base();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }
}
