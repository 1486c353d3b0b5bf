//! Throttled upstream page loop shared by warming and expansion.
//!
//! Walks upstream pages in order, enriching, filtering and deduplicating as
//! it goes. Stops at the upstream's last page, at the item target, at the
//! page limit, or when a failure budget runs out. Failed pages are skipped;
//! only consecutive failures count against the budget.

use crate::dedup::dedupe;
use marquee_core::{
    CacheKey, CatalogItem, EngineConfig, ItemFilter, ItemId, ItemProcessor, ReleaseWindow,
    UpstreamClient, UpstreamError, UpstreamRequest,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// What to fetch.
pub struct FetchPlan<'a> {
    pub key: CacheKey,
    pub window: ReleaseWindow,
    /// First upstream page to request.
    pub start_page: u32,
    /// Maximum number of pages to request in this pass.
    pub max_pages: u32,
    /// Stop once this many items have been accumulated, seed included.
    pub target_items: Option<usize>,
    pub filter: &'a dyn ItemFilter,
    /// Items already held; their ids are never fetched again.
    pub seed: Vec<CatalogItem>,
}

/// Why a pass stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    ConsecutiveFailures { count: u32, last_error: UpstreamError },
    ConsecutiveEmptyPages { count: u32 },
}

/// Result of a fetch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Seed plus everything new, deduplicated, unsorted.
    pub items: Vec<CatalogItem>,
    /// Highest page requested, or `start_page - 1` when nothing was requested.
    pub last_page: u32,
    /// Deepest page a later pass may resume after. Equals `last_page` unless
    /// the pass aborted on failures, in which case the trailing run of failed
    /// pages is excluded so those pages get requested again.
    pub settled_page: u32,
    /// Pages that returned at least one item and enriched successfully.
    pub pages_succeeded: u32,
    pub upstream_total_pages: Option<u32>,
    pub upstream_exhausted: bool,
    pub abort: Option<AbortReason>,
}

impl FetchOutcome {
    /// Every request failed; there is nothing worth storing.
    pub fn is_failed(&self) -> bool {
        self.pages_succeeded == 0
            && matches!(self.abort, Some(AbortReason::ConsecutiveFailures { .. }))
    }

    pub fn last_error(&self) -> Option<&UpstreamError> {
        match &self.abort {
            Some(AbortReason::ConsecutiveFailures { last_error, .. }) => Some(last_error),
            _ => None,
        }
    }
}

/// Drives [`UpstreamClient`] and [`ItemProcessor`] under the engine's
/// throttle and failure budgets.
pub struct PageFetcher {
    upstream: Arc<dyn UpstreamClient>,
    processor: Arc<dyn ItemProcessor>,
    page_delay: Duration,
    max_failures: u32,
    max_empty_pages: u32,
}

impl PageFetcher {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        processor: Arc<dyn ItemProcessor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            upstream,
            processor,
            page_delay: config.page_delay,
            max_failures: config.max_consecutive_failures,
            max_empty_pages: config.max_consecutive_empty_pages,
        }
    }

    pub async fn fetch(&self, plan: FetchPlan<'_>) -> FetchOutcome {
        let FetchPlan {
            key,
            window,
            start_page,
            max_pages,
            target_items,
            filter,
            seed,
        } = plan;

        let mut known: HashSet<ItemId> = seed.iter().map(|item| item.id).collect();
        let mut items = seed;
        let mut total_pages: Option<u32> = None;
        let mut exhausted = false;
        let mut abort = None;
        let mut consecutive_failures = 0u32;
        let mut consecutive_empty = 0u32;
        let mut pages_succeeded = 0u32;
        let mut requested = 0u32;
        let mut last_page = start_page.saturating_sub(1);

        let end_page = start_page.saturating_add(max_pages.saturating_sub(1));
        let mut page = start_page;

        while max_pages > 0 && page <= end_page {
            if target_items.is_some_and(|target| items.len() >= target) {
                break;
            }
            if total_pages.is_some_and(|total| page > total) {
                exhausted = true;
                break;
            }

            if requested > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            requested += 1;
            last_page = page;

            let request = UpstreamRequest {
                sort_hint: key.sort.upstream_sort_hint(),
                page,
                window: window.clone(),
            };

            let result = match self.upstream.fetch_page(&request).await {
                Ok(upstream_page) => {
                    total_pages = Some(upstream_page.total_pages);
                    if upstream_page.items.is_empty() {
                        Ok(None)
                    } else {
                        self.processor
                            .enrich(key.kind, upstream_page.items)
                            .await
                            .map(Some)
                    }
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(Some(enriched)) => {
                    consecutive_failures = 0;
                    consecutive_empty = 0;
                    pages_succeeded += 1;

                    let fetched = enriched.len();
                    let matching: Vec<CatalogItem> =
                        enriched.into_iter().filter(|item| filter.matches(item)).collect();
                    let fresh = dedupe(matching, &known);
                    known.extend(fresh.iter().map(|item| item.id));
                    tracing::debug!(
                        key = %key,
                        page,
                        fetched,
                        added = fresh.len(),
                        accumulated = items.len() + fresh.len(),
                        "Fetched upstream page"
                    );
                    items.extend(fresh);
                }
                Ok(None) => {
                    consecutive_failures = 0;
                    consecutive_empty += 1;
                    tracing::debug!(key = %key, page, consecutive_empty, "Upstream returned an empty page");
                    if consecutive_empty >= self.max_empty_pages {
                        tracing::warn!(
                            key = %key,
                            page,
                            count = consecutive_empty,
                            "Too many consecutive empty pages; stopping fetch"
                        );
                        // Treat a run of empty pages as the real end of the listing.
                        exhausted = true;
                        abort = Some(AbortReason::ConsecutiveEmptyPages {
                            count: consecutive_empty,
                        });
                        break;
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        key = %key,
                        page,
                        consecutive_failures,
                        error = %err,
                        "Upstream page fetch failed; skipping page"
                    );
                    if consecutive_failures >= self.max_failures {
                        abort = Some(AbortReason::ConsecutiveFailures {
                            count: consecutive_failures,
                            last_error: err,
                        });
                        break;
                    }
                }
            }

            page += 1;
        }

        if total_pages.is_some_and(|total| last_page >= total) {
            exhausted = true;
        }

        let settled_page = match &abort {
            Some(AbortReason::ConsecutiveFailures { count, .. }) => {
                // Nothing past the failed run is known; the listing may go on.
                exhausted = false;
                last_page.saturating_sub(*count)
            }
            _ => last_page,
        };

        FetchOutcome {
            items,
            last_page,
            settled_page,
            pages_succeeded,
            upstream_total_pages: total_pages,
            upstream_exhausted: exhausted,
            abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::AcceptAll;
    use marquee_test_utils::{
        catalog_items, server_error, test_config, upcoming_key, MockUpstream, PageScript,
        PassthroughProcessor,
    };

    fn fetcher(upstream: Arc<MockUpstream>) -> PageFetcher {
        PageFetcher::new(upstream, Arc::new(PassthroughProcessor), &test_config())
    }

    fn plan(filter: &dyn ItemFilter, start_page: u32, max_pages: u32) -> FetchPlan<'_> {
        FetchPlan {
            key: upcoming_key(),
            window: ReleaseWindow::default(),
            start_page,
            max_pages,
            target_items: None,
            filter,
            seed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_stops_at_upstream_end() {
        let upstream = Arc::new(MockUpstream::with_items(45, 20));
        let outcome = fetcher(upstream.clone()).fetch(plan(&AcceptAll, 1, 10)).await;

        assert_eq!(outcome.items.len(), 45);
        assert_eq!(outcome.last_page, 3);
        assert!(outcome.upstream_exhausted);
        assert!(outcome.abort.is_none());
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_target() {
        let upstream = Arc::new(MockUpstream::with_items(200, 20));
        let mut fetch_plan = plan(&AcceptAll, 1, 10);
        fetch_plan.target_items = Some(50);

        let outcome = fetcher(upstream.clone()).fetch(fetch_plan).await;
        assert_eq!(outcome.items.len(), 60);
        assert_eq!(upstream.calls(), 3);
        assert!(!outcome.upstream_exhausted);
    }

    #[tokio::test]
    async fn test_seed_ids_are_not_refetched() {
        let upstream = Arc::new(MockUpstream::with_items(40, 20));
        let mut fetch_plan = plan(&AcceptAll, 1, 2);
        fetch_plan.seed = catalog_items(25);

        let outcome = fetcher(upstream).fetch(fetch_plan).await;
        assert_eq!(outcome.items.len(), 40);
        assert!(crate::dedup::find_duplicate_ids(&outcome.items).is_empty());
    }

    #[tokio::test]
    async fn test_failed_pages_are_skipped() {
        let upstream = Arc::new(
            MockUpstream::with_items(60, 20).script(2, PageScript::Fail(server_error(2))),
        );
        let outcome = fetcher(upstream.clone()).fetch(plan(&AcceptAll, 1, 10)).await;

        assert_eq!(outcome.items.len(), 40);
        assert_eq!(outcome.pages_succeeded, 2);
        assert!(outcome.abort.is_none());
        assert_eq!(upstream.requested_pages(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_consecutive_failures_abort() {
        let upstream = Arc::new(
            MockUpstream::with_items(100, 10)
                .script(1, PageScript::Fail(server_error(1)))
                .script(2, PageScript::Fail(server_error(2)))
                .script(3, PageScript::Fail(server_error(3))),
        );
        let outcome = fetcher(upstream.clone()).fetch(plan(&AcceptAll, 1, 10)).await;

        assert!(outcome.is_failed());
        assert_eq!(outcome.last_error(), Some(&server_error(3)));
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_failure_abort_settles_before_failed_run() {
        let upstream = Arc::new(
            MockUpstream::with_items(100, 10)
                .script(3, PageScript::Fail(server_error(3)))
                .script(4, PageScript::Fail(server_error(4)))
                .script(5, PageScript::Fail(server_error(5))),
        );
        let outcome = fetcher(upstream).fetch(plan(&AcceptAll, 1, 10)).await;

        assert!(!outcome.is_failed());
        assert_eq!(outcome.last_page, 5);
        assert_eq!(outcome.settled_page, 2);
        assert!(!outcome.upstream_exhausted);
    }

    #[tokio::test]
    async fn test_three_empty_pages_abort() {
        let upstream = Arc::new(
            MockUpstream::with_items(100, 10)
                .script(2, PageScript::Empty)
                .script(3, PageScript::Empty)
                .script(4, PageScript::Empty),
        );
        let outcome = fetcher(upstream.clone()).fetch(plan(&AcceptAll, 1, 10)).await;

        assert_eq!(outcome.items.len(), 10);
        assert!(matches!(
            outcome.abort,
            Some(AbortReason::ConsecutiveEmptyPages { count: 3 })
        ));
        assert!(!outcome.is_failed());
        assert_eq!(upstream.calls(), 4);
    }

    #[tokio::test]
    async fn test_filter_applies_before_dedupe() {
        let upstream = Arc::new(MockUpstream::with_items(20, 10));
        let even = |item: &CatalogItem| item.id % 2 == 0;
        let outcome = fetcher(upstream).fetch(plan(&even, 1, 5)).await;

        assert_eq!(outcome.items.len(), 10);
        assert!(outcome.items.iter().all(|item| item.id % 2 == 0));
    }

    #[tokio::test]
    async fn test_starts_from_given_page() {
        let upstream = Arc::new(MockUpstream::with_items(100, 10));
        let outcome = fetcher(upstream.clone()).fetch(plan(&AcceptAll, 4, 2)).await;

        assert_eq!(upstream.requested_pages(), vec![4, 5]);
        assert_eq!(outcome.last_page, 5);
        assert_eq!(outcome.settled_page, 5);
        assert_eq!(outcome.items.first().map(|i| i.id), Some(31));
    }
}
