//! Collection warming: build a collection from upstream page 1.

use crate::fetch::{FetchPlan, PageFetcher};
use crate::store::WarmedCollection;
use marquee_core::{
    CacheKey, Clock, CollectionError, EngineConfig, ItemFilter, MarqueeError, MarqueeResult,
};
use std::sync::Arc;

/// Builds collections from scratch, or continues one seeded by a quick fetch.
pub struct Warmer {
    fetcher: Arc<PageFetcher>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl Warmer {
    pub fn new(fetcher: Arc<PageFetcher>, config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            config,
            clock,
        }
    }

    /// Fetch pages from 1 until `target_size` items are held, upstream runs
    /// out, `max_pages` pages were requested, or a failure budget is spent.
    ///
    /// Fails only when no page at all could be fetched.
    pub async fn warm(
        &self,
        key: CacheKey,
        filter: &dyn ItemFilter,
        target_size: usize,
        max_pages: u32,
    ) -> MarqueeResult<WarmedCollection> {
        self.resume(key, filter, WarmedCollection::default(), target_size, max_pages)
            .await
    }

    /// Continue a partial warm from the page after `seed.pages_fetched`.
    /// `max_pages` counts from page 1, seed pages included.
    pub async fn resume(
        &self,
        key: CacheKey,
        filter: &dyn ItemFilter,
        seed: WarmedCollection,
        target_size: usize,
        max_pages: u32,
    ) -> MarqueeResult<WarmedCollection> {
        let start_page = seed.pages_fetched + 1;
        let seeded = seed.items.len();
        let window = key.kind.window(self.clock.today(), &self.config);

        let outcome = self
            .fetcher
            .fetch(FetchPlan {
                key,
                window,
                start_page,
                max_pages: max_pages.saturating_sub(seed.pages_fetched),
                target_items: Some(target_size),
                filter,
                seed: seed.items,
            })
            .await;

        if outcome.is_failed() && seeded == 0 {
            let err: MarqueeError = match outcome.last_error() {
                Some(last) => last.clone().into(),
                None => CollectionError::Unavailable {
                    key: key.to_string(),
                    reason: "no upstream page could be fetched".to_string(),
                }
                .into(),
            };
            tracing::error!(key = %key, error = %err, "Collection warm failed");
            return Err(err);
        }

        let warmed = WarmedCollection {
            pages_fetched: outcome.settled_page.max(seed.pages_fetched),
            upstream_total_pages: outcome.upstream_total_pages.or(seed.upstream_total_pages),
            upstream_exhausted: outcome.upstream_exhausted,
            aborted: outcome.abort.is_some(),
            items: outcome.items,
        };

        tracing::info!(
            key = %key,
            items = warmed.items.len(),
            seeded,
            pages = warmed.pages_fetched,
            exhausted = warmed.upstream_exhausted,
            aborted = warmed.aborted,
            "Collection warmed"
        );
        Ok(warmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::AcceptAll;
    use marquee_test_utils::{
        server_error, test_config, upcoming_key, ManualClock, MockUpstream, PageScript,
        PassthroughProcessor,
    };

    fn warmer(upstream: Arc<MockUpstream>) -> Warmer {
        let config = Arc::new(test_config());
        let fetcher = Arc::new(PageFetcher::new(upstream, Arc::new(PassthroughProcessor), &config));
        Warmer::new(fetcher, config, Arc::new(ManualClock::at_base()))
    }

    #[tokio::test]
    async fn test_warm_reaches_target() {
        let upstream = Arc::new(MockUpstream::with_items(500, 20));
        let warmed = warmer(upstream.clone())
            .warm(upcoming_key(), &AcceptAll, 60, 10)
            .await
            .unwrap();

        assert_eq!(warmed.items.len(), 60);
        assert_eq!(warmed.pages_fetched, 3);
        assert!(!warmed.upstream_exhausted);
        assert_eq!(upstream.calls(), 3);
    }

    #[tokio::test]
    async fn test_warm_bounded_by_max_pages() {
        let upstream = Arc::new(MockUpstream::with_items(500, 20));
        let warmed = warmer(upstream.clone())
            .warm(upcoming_key(), &AcceptAll, 400, 2)
            .await
            .unwrap();

        assert_eq!(warmed.items.len(), 40);
        assert_eq!(upstream.calls(), 2);
        assert!(warmed.is_complete(400, 2));
    }

    #[tokio::test]
    async fn test_resume_continues_after_seed() {
        let upstream = Arc::new(MockUpstream::with_items(500, 20));
        let warmer = warmer(upstream.clone());
        let key = upcoming_key();

        let quick = warmer.warm(key, &AcceptAll, 60, 1).await.unwrap();
        assert_eq!(quick.items.len(), 20);

        let full = warmer.resume(key, &AcceptAll, quick, 60, 3).await.unwrap();
        assert_eq!(full.items.len(), 60);
        assert_eq!(full.pages_fetched, 3);
        assert_eq!(upstream.requested_pages(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_warm_fails_when_every_page_fails() {
        let upstream = Arc::new(
            MockUpstream::with_items(100, 20)
                .script(1, PageScript::Fail(server_error(1)))
                .script(2, PageScript::Fail(server_error(2)))
                .script(3, PageScript::Fail(server_error(3))),
        );
        let err = warmer(upstream)
            .warm(upcoming_key(), &AcceptAll, 60, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MarqueeError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_warm_keeps_partial_result_on_empty_pages() {
        let upstream = Arc::new(
            MockUpstream::with_items(200, 20)
                .script(3, PageScript::Empty)
                .script(4, PageScript::Empty)
                .script(5, PageScript::Empty),
        );
        let warmed = warmer(upstream)
            .warm(upcoming_key(), &AcceptAll, 200, 10)
            .await
            .unwrap();

        assert_eq!(warmed.items.len(), 40);
        assert!(warmed.aborted);
    }

    #[tokio::test]
    async fn test_aborted_warm_records_last_good_page() {
        let upstream = Arc::new(
            MockUpstream::with_items(500, 20)
                .script(3, PageScript::Fail(server_error(3)))
                .script(4, PageScript::Fail(server_error(4)))
                .script(5, PageScript::Fail(server_error(5))),
        );
        let warmer = warmer(upstream.clone());
        let warmed = warmer
            .warm(upcoming_key(), &AcceptAll, 200, 10)
            .await
            .unwrap();

        assert_eq!(warmed.items.len(), 40);
        assert_eq!(warmed.pages_fetched, 2);
        assert!(warmed.aborted);

        upstream.clear_scripts();
        let resumed = warmer
            .resume(upcoming_key(), &AcceptAll, warmed, 100, 10)
            .await
            .unwrap();
        assert_eq!(resumed.items.len(), 100);
        assert_eq!(resumed.pages_fetched, 5);
    }
}
