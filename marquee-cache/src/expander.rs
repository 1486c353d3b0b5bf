//! Collection expansion: grow a collection past its current depth.
//!
//! Each pass fetches the next `expansion_step_pages` upstream pages after the
//! deepest page already fetched, merges the new items and raises the
//! expansion level by one, up to `max_expansion_level`. Expansion is
//! temporary: once `expansion_ttl` elapses the level resets to 0 and the
//! collection is rebuilt at base depth on next access.

use crate::fetch::{FetchPlan, PageFetcher};
use crate::inflight::{Claim, InFlightGuard, InFlightRegistry, TaskKind, TaskOutcome};
use crate::store::{CollectionStore, ExpansionBatch};
use marquee_core::{CacheKey, Clock, EngineConfig, ItemFilter, MarqueeError, MarqueeResult};
use std::sync::Arc;

/// Runs single-flight expansion passes against a [`CollectionStore`].
pub struct Expander {
    fetcher: Arc<PageFetcher>,
    store: Arc<CollectionStore>,
    registry: Arc<InFlightRegistry>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl Expander {
    pub fn new(
        fetcher: Arc<PageFetcher>,
        store: Arc<CollectionStore>,
        registry: Arc<InFlightRegistry>,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            store,
            registry,
            config,
            clock,
        }
    }

    /// Run one expansion pass for `key`.
    ///
    /// Returns whether a pass was merged into the collection. A pass already
    /// running for the key makes this a no-op.
    pub async fn expand(&self, key: CacheKey, filter: &dyn ItemFilter) -> MarqueeResult<bool> {
        match self.registry.claim(key, TaskKind::Expansion) {
            Claim::Leader(guard) => self.run_claimed(guard, filter).await,
            Claim::Follower(_) => {
                tracing::debug!(key = %key, "Expansion already in flight");
                Ok(false)
            }
        }
    }

    /// Run a pass under an expansion slot the caller already holds.
    pub async fn run_claimed(
        &self,
        guard: InFlightGuard,
        filter: &dyn ItemFilter,
    ) -> MarqueeResult<bool> {
        let key = guard.key();
        match self.expand_once(key, filter).await {
            Ok(outcome) => {
                let applied = matches!(outcome, TaskOutcome::Succeeded { .. });
                guard.finish(outcome);
                Ok(applied)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Collection expansion failed");
                guard.finish(TaskOutcome::Failed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn expand_once(&self, key: CacheKey, filter: &dyn ItemFilter) -> MarqueeResult<TaskOutcome> {
        self.store.reset_expired_expansion(&key)?;

        let Some(snapshot) = self.store.peek(&key)? else {
            return Ok(skipped("collection absent"));
        };
        if !snapshot.can_expand(&self.config) {
            return Ok(skipped("collection cannot grow further"));
        }

        let start_page = snapshot.meta.pages_fetched + 1;
        let outcome = self
            .fetcher
            .fetch(FetchPlan {
                key,
                window: key.kind.window(self.clock.today(), &self.config),
                start_page,
                max_pages: self.config.expansion_step_pages,
                target_items: None,
                filter,
                // Overlap with the stored collection is removed on merge.
                seed: Vec::new(),
            })
            .await;

        if outcome.is_failed() {
            if let Some(err) = outcome.last_error() {
                return Err(MarqueeError::from(err.clone()));
            }
        }

        let fetched = outcome.items.len();
        let batch = ExpansionBatch {
            base_generation: snapshot.meta.generation,
            items: outcome.items,
            pages_fetched: outcome.settled_page,
            upstream_total_pages: outcome.upstream_total_pages,
            upstream_exhausted: outcome.upstream_exhausted,
        };

        match self.store.apply_expansion(&key, batch)? {
            Some(added) => {
                let size = snapshot.len() + added;
                tracing::info!(
                    key = %key,
                    start_page,
                    fetched,
                    added,
                    collection_size = size,
                    level = snapshot.meta.expansion_level + 1,
                    "Collection expanded"
                );
                Ok(TaskOutcome::Succeeded {
                    collection_size: size,
                })
            }
            None => {
                tracing::debug!(
                    key = %key,
                    generation = snapshot.meta.generation,
                    "Collection rebuilt during expansion; discarding batch"
                );
                Ok(skipped("collection rebuilt during expansion"))
            }
        }
    }
}

fn skipped(reason: &str) -> TaskOutcome {
    TaskOutcome::Skipped {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WarmedCollection;
    use marquee_core::AcceptAll;
    use marquee_test_utils::{
        catalog_items, server_error, test_config, upcoming_key, ManualClock, MockUpstream,
        PageScript, PassthroughProcessor,
    };
    use std::time::Duration;

    struct Fixture {
        expander: Expander,
        store: Arc<CollectionStore>,
        registry: Arc<InFlightRegistry>,
        upstream: Arc<MockUpstream>,
        clock: Arc<ManualClock>,
    }

    fn fixture(upstream: MockUpstream) -> Fixture {
        fixture_with(test_config(), upstream)
    }

    fn fixture_with(config: EngineConfig, upstream: MockUpstream) -> Fixture {
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::at_base());
        let upstream = Arc::new(upstream);
        let store = Arc::new(CollectionStore::new(config.clone(), clock.clone()));
        let registry = Arc::new(InFlightRegistry::new());
        let fetcher = Arc::new(PageFetcher::new(
            upstream.clone(),
            Arc::new(PassthroughProcessor),
            &config,
        ));
        let expander = Expander::new(fetcher, store.clone(), registry.clone(), config, clock.clone());
        Fixture {
            expander,
            store,
            registry,
            upstream,
            clock,
        }
    }

    fn seed(store: &CollectionStore, items: u64, pages: u32) {
        store
            .replace(
                upcoming_key(),
                WarmedCollection {
                    items: catalog_items(items),
                    pages_fetched: pages,
                    upstream_total_pages: Some(50),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_expand_fetches_next_pages() {
        let f = fixture(MockUpstream::with_items(1000, 20));
        seed(&f.store, 60, 3);

        assert!(f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());

        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot.meta.expansion_level, 1);
        assert_eq!(snapshot.meta.pages_fetched, 5);
        assert_eq!(f.upstream.requested_pages(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_expand_stops_at_max_level() {
        let f = fixture(MockUpstream::with_items(1000, 20));
        seed(&f.store, 60, 3);

        for _ in 0..3 {
            assert!(f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());
        }
        let calls = f.upstream.calls();
        assert!(!f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());
        assert_eq!(f.upstream.calls(), calls);

        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.meta.expansion_level, 3);
    }

    #[tokio::test]
    async fn test_expand_noop_when_in_flight() {
        let f = fixture(MockUpstream::with_items(1000, 20));
        seed(&f.store, 60, 3);

        let Claim::Leader(_held) = f.registry.claim(upcoming_key(), TaskKind::Expansion) else {
            panic!("slot should be free");
        };
        assert!(!f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());
        assert_eq!(f.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_expand_absent_collection_is_noop() {
        let f = fixture(MockUpstream::with_items(1000, 20));
        assert!(!f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());
        assert_eq!(f.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_expansion_blocks_further_growth() {
        let f = fixture(MockUpstream::with_items(1000, 20));
        seed(&f.store, 60, 3);
        assert!(f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());

        f.clock.advance(Duration::from_secs(601));
        assert!(!f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());

        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.meta.expansion_level, 0);
        assert!(snapshot.meta.rebuild_requested);
    }

    #[tokio::test]
    async fn test_expand_failure_releases_slot() {
        let upstream = MockUpstream::with_items(1000, 20)
            .script(4, PageScript::Fail(server_error(4)))
            .script(5, PageScript::Fail(server_error(5)));
        let f = fixture_with(test_config().with_failure_budget(2, 3), upstream);
        seed(&f.store, 60, 3);

        let err = f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap_err();
        assert!(matches!(err, MarqueeError::Upstream(_)));
        assert!(!f.registry.is_in_flight(&upcoming_key(), TaskKind::Expansion));

        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.len(), 60);
        assert_eq!(snapshot.meta.expansion_level, 0);
    }

    #[tokio::test]
    async fn test_failed_pages_are_retried_by_next_pass() {
        let upstream = MockUpstream::with_items(1000, 20)
            .script(5, PageScript::Fail(server_error(5)))
            .script(6, PageScript::Fail(server_error(6)));
        let config = test_config()
            .with_expansion(3, 3, Duration::from_secs(600))
            .with_failure_budget(2, 3);
        let f = fixture_with(config, upstream);
        seed(&f.store, 60, 3);

        assert!(f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());
        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.len(), 80);
        assert_eq!(snapshot.meta.pages_fetched, 4);

        f.upstream.clear_scripts();
        assert!(f.expander.expand(upcoming_key(), &AcceptAll).await.unwrap());

        assert_eq!(f.upstream.requested_pages(), vec![4, 5, 6, 5, 6, 7]);
        let snapshot = f.store.peek(&upcoming_key()).unwrap().unwrap();
        assert_eq!(snapshot.len(), 140);
        assert_eq!(snapshot.meta.pages_fetched, 7);
        let ids: std::collections::HashSet<_> = snapshot.items.iter().map(|item| item.id).collect();
        assert!((81..=120).all(|id| ids.contains(&id)));
    }
}
