//! Pagination service: the request-facing facade of the engine.
//!
//! Resolves a collection for each request (cached, stale, or quick-fetched
//! on a cold key), cuts the requested page and decides whether the
//! collection should grow. All refresh and expansion work runs on spawned
//! tasks under the [`InFlightRegistry`], so a caller that goes away never
//! cancels work other callers are waiting for.

use crate::expander::Expander;
use crate::extract::{extract_page, PageExtract};
use crate::fetch::PageFetcher;
use crate::inflight::{Claim, InFlightGuard, InFlightRegistry, InFlightWaiter, TaskKind, TaskOutcome};
use crate::stats::{CollectionState, EngineStats, KeyFreshness};
use crate::store::{CollectionSnapshot, CollectionStore, WarmedCollection};
use crate::warmer::Warmer;
use marquee_core::{
    CacheKey, Clock, CollectionError, EngineConfig, ExpansionTrigger, FilterProvider, ItemFilter,
    ItemId, ItemProcessor, MarqueeError, MarqueeResult, PageRequest, PageResult, PageSource,
    UpstreamClient,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Handle to the engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PaginationService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    store: Arc<CollectionStore>,
    registry: Arc<InFlightRegistry>,
    warmer: Warmer,
    expander: Expander,
    filters: Arc<dyn FilterProvider>,
}

impl std::fmt::Debug for PaginationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationService")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl PaginationService {
    /// Assemble the engine around its collaborators.
    pub fn new(
        config: EngineConfig,
        upstream: Arc<dyn UpstreamClient>,
        processor: Arc<dyn ItemProcessor>,
        filters: Arc<dyn FilterProvider>,
        clock: Arc<dyn Clock>,
    ) -> MarqueeResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let store = Arc::new(CollectionStore::new(config.clone(), clock.clone()));
        let registry = Arc::new(InFlightRegistry::new());
        let fetcher = Arc::new(PageFetcher::new(upstream, processor, &config));
        let warmer = Warmer::new(fetcher.clone(), config.clone(), clock.clone());
        let expander = Expander::new(
            fetcher,
            store.clone(),
            registry.clone(),
            config.clone(),
            clock.clone(),
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                clock,
                store,
                registry,
                warmer,
                expander,
                filters,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.inner.registry
    }

    // ========================================================================
    // PAGE REQUESTS
    // ========================================================================

    /// Serve one page of the collection named by `request.key`.
    ///
    /// Items whose id is in `exclude_ids` are never returned.
    pub async fn get_page(&self, request: PageRequest) -> MarqueeResult<PageResult> {
        request.validate(self.inner.config.max_page_size)?;
        let PageRequest {
            key,
            page,
            page_size,
            exclude_ids,
        } = request;

        let (mut snapshot, served_from) = self.resolve(key).await?;
        let mut extract = extract_page(&snapshot.items, page, page_size, &exclude_ids);
        let mut trigger = ExpansionTrigger::None;

        if extract.is_partial(page_size) {
            trigger = self
                .fill_partial_page(key, page, page_size, &exclude_ids, &mut snapshot, &mut extract)
                .await?;
        } else if snapshot.can_expand(&self.inner.config)
            && extract.remaining_after < self.inner.config.expansion_buffer_pages * page_size
            && self.spawn_expansion(key)
        {
            trigger = ExpansionTrigger::Background;
        }

        if !extract.duplicate_ids.is_empty() {
            tracing::warn!(
                key = %key,
                page,
                duplicates = ?extract.duplicate_ids,
                "Duplicate ids in extracted page"
            );
        }

        tracing::debug!(
            key = %key,
            page,
            page_size,
            excluded = exclude_ids.len(),
            returned = extract.items.len(),
            collection_size = extract.collection_size,
            has_more = extract.has_more,
            source = ?served_from,
            expansion = ?trigger,
            "Served page"
        );

        Ok(PageResult {
            items: extract.items,
            has_more: extract.has_more,
            total_count: extract.total_count,
            collection_size: extract.collection_size,
            expansion_triggered: trigger,
            served_from,
            duplicate_ids: extract.duplicate_ids,
        })
    }

    /// Grow the collection until the requested page is full or nothing more
    /// can be fetched. Every expansion pass raises the level, so
    /// `max_expansion_level` bounds the loop.
    async fn fill_partial_page(
        &self,
        key: CacheKey,
        page: u32,
        page_size: usize,
        exclude_ids: &HashSet<ItemId>,
        snapshot: &mut CollectionSnapshot,
        extract: &mut PageExtract,
    ) -> MarqueeResult<ExpansionTrigger> {
        let mut trigger = ExpansionTrigger::None;

        while extract.is_partial(page_size) {
            let before = progress_marker(snapshot);
            if snapshot.meta.rebuild_requested {
                // The collection is about to be replaced; growing it would
                // only race that warm.
                let outcome = self.refresh_and_wait(key).await;
                tracing::debug!(key = %key, ?outcome, "Awaited refresh for partial page");
            } else if snapshot.can_expand(&self.inner.config) {
                self.expand_and_wait(key).await;
            } else {
                break;
            }
            trigger = ExpansionTrigger::Synchronous;

            self.reextract(&key, page, page_size, exclude_ids, snapshot, extract)?;
            if progress_marker(snapshot) == before {
                tracing::debug!(
                    key = %key,
                    page,
                    returned = extract.items.len(),
                    "Collection did not grow; serving partial page"
                );
                break;
            }
        }

        Ok(trigger)
    }

    fn reextract(
        &self,
        key: &CacheKey,
        page: u32,
        page_size: usize,
        exclude_ids: &HashSet<ItemId>,
        snapshot: &mut CollectionSnapshot,
        extract: &mut PageExtract,
    ) -> MarqueeResult<()> {
        if let Some(latest) = self.inner.store.peek(key)? {
            *extract = extract_page(&latest.items, page, page_size, exclude_ids);
            *snapshot = latest;
        }
        Ok(())
    }

    /// Find a servable collection for `key`, building one if the key is cold.
    async fn resolve(&self, key: CacheKey) -> MarqueeResult<(CollectionSnapshot, PageSource)> {
        let inner = &self.inner;
        inner.store.reset_expired_expansion(&key)?;

        if let Some(snapshot) = inner.store.get(&key)? {
            if snapshot.needs_full_refresh(inner.clock.now(), &inner.config) {
                if self.spawn_refresh(key) {
                    tracing::info!(
                        key = %key,
                        age_secs = snapshot.age(inner.clock.now()).as_secs(),
                        items = snapshot.len(),
                        "Serving stale collection while refreshing"
                    );
                }
                return Ok((snapshot, PageSource::Stale));
            }
            return Ok((snapshot, PageSource::Cache));
        }

        match inner.registry.claim(key, TaskKind::Refresh) {
            Claim::Leader(guard) => self.cold_start(guard).await,
            Claim::Follower(mut waiter) => {
                let outcome = waiter.published().await;
                match inner.store.peek(&key)? {
                    Some(snapshot) => Ok((snapshot, PageSource::QuickFetch)),
                    None => Err(unavailable(&key, outcome)),
                }
            }
        }
    }

    /// Answer a cold key from a quick fetch, then finish the full warm in the
    /// background under the same refresh slot.
    async fn cold_start(&self, guard: InFlightGuard) -> MarqueeResult<(CollectionSnapshot, PageSource)> {
        let inner = &self.inner;
        let key = guard.key();
        let config = &inner.config;
        // A refresh may have stored the key between the lookup and the claim.
        if let Some(snapshot) = inner.store.peek(&key)? {
            guard.finish(TaskOutcome::Skipped {
                reason: "collection already stored".to_string(),
            });
            return Ok((snapshot, PageSource::Cache));
        }

        let filter = self.filter_for(&key);

        tracing::info!(
            key = %key,
            quick_fetch_pages = config.quick_fetch_pages,
            "Cold cache; running quick fetch"
        );

        let quick = match inner
            .warmer
            .warm(key, filter.as_ref(), config.warm_target_size, config.quick_fetch_pages)
            .await
        {
            Ok(quick) => quick,
            Err(err) => {
                guard.finish(TaskOutcome::Failed {
                    reason: err.to_string(),
                });
                return Err(CollectionError::Unavailable {
                    key: key.to_string(),
                    reason: err.to_string(),
                }
                .into());
            }
        };

        let complete = quick.is_complete(config.warm_target_size, config.warm_max_pages);
        let seed = (!complete).then(|| quick.clone());
        let snapshot = inner.store.replace(key, quick, !complete)?;

        match seed {
            None => guard.finish(TaskOutcome::Succeeded {
                collection_size: snapshot.len(),
            }),
            Some(seed) => {
                guard.publish();
                let service = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = service.run_refresh(guard, Some(seed)).await {
                        tracing::error!(key = %key, error = %err, "Background warm failed");
                    }
                });
            }
        }

        Ok((snapshot, PageSource::QuickFetch))
    }

    // ========================================================================
    // BACKGROUND WORK
    // ========================================================================

    /// Start a full warm for `key` unless one is already running.
    fn spawn_refresh(&self, key: CacheKey) -> bool {
        match self.inner.registry.claim(key, TaskKind::Refresh) {
            Claim::Leader(guard) => {
                self.spawn_claimed_refresh(guard);
                true
            }
            Claim::Follower(_) => false,
        }
    }

    fn spawn_claimed_refresh(&self, guard: InFlightGuard) {
        let service = self.clone();
        let key = guard.key();
        tokio::spawn(async move {
            if let Err(err) = service.run_refresh(guard, None).await {
                tracing::error!(key = %key, error = %err, "Background refresh failed");
            }
        });
    }

    /// Full warm under a held refresh slot, optionally continuing a seed.
    async fn run_refresh(
        &self,
        guard: InFlightGuard,
        seed: Option<WarmedCollection>,
    ) -> MarqueeResult<usize> {
        let inner = &self.inner;
        let key = guard.key();
        let filter = self.filter_for(&key);
        let (target, max_pages) = (inner.config.warm_target_size, inner.config.warm_max_pages);

        let result = match seed {
            Some(seed) => {
                inner
                    .warmer
                    .resume(key, filter.as_ref(), seed, target, max_pages)
                    .await
            }
            None => inner.warmer.warm(key, filter.as_ref(), target, max_pages).await,
        };

        let warmed = match result {
            Ok(warmed) => warmed,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Collection refresh failed; keeping stored data");
                guard.finish(TaskOutcome::Failed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        if warmed.aborted {
            if let Some(current) = inner.store.peek(&key)? {
                if current.len() > warmed.items.len() {
                    tracing::warn!(
                        key = %key,
                        fetched = warmed.items.len(),
                        stored = current.len(),
                        "Refresh aborted short of the stored collection; keeping stored data"
                    );
                    guard.finish(TaskOutcome::Skipped {
                        reason: "refresh aborted short of the stored collection".to_string(),
                    });
                    return Ok(current.len());
                }
            }
        }

        let snapshot = inner.store.replace(key, warmed, false)?;
        guard.finish(TaskOutcome::Succeeded {
            collection_size: snapshot.len(),
        });
        Ok(snapshot.len())
    }

    /// Start an expansion pass for `key` unless one is already running.
    fn spawn_expansion(&self, key: CacheKey) -> bool {
        match self.inner.registry.claim(key, TaskKind::Expansion) {
            Claim::Leader(guard) => {
                self.spawn_claimed_expansion(guard);
                true
            }
            Claim::Follower(_) => false,
        }
    }

    fn spawn_claimed_expansion(&self, guard: InFlightGuard) {
        let service = self.clone();
        tokio::spawn(async move {
            let filter = service.filter_for(&guard.key());
            // Failures are logged by the expander.
            let _ = service
                .inner
                .expander
                .run_claimed(guard, filter.as_ref())
                .await;
        });
    }

    /// Run (or join) a full warm for `key` and wait for it to finish.
    async fn refresh_and_wait(&self, key: CacheKey) -> TaskOutcome {
        let waiter = match self.inner.registry.claim(key, TaskKind::Refresh) {
            Claim::Leader(guard) => {
                let waiter = guard.subscribe();
                self.spawn_claimed_refresh(guard);
                waiter
            }
            Claim::Follower(waiter) => waiter,
        };
        waiter.finished().await
    }

    /// Run (or join) an expansion pass for `key` and wait for it.
    async fn expand_and_wait(&self, key: CacheKey) -> TaskOutcome {
        let waiter: InFlightWaiter = match self.inner.registry.claim(key, TaskKind::Expansion) {
            Claim::Leader(guard) => {
                let waiter = guard.subscribe();
                self.spawn_claimed_expansion(guard);
                waiter
            }
            Claim::Follower(waiter) => waiter,
        };
        let outcome = waiter.finished().await;
        tracing::debug!(key = %key, ?outcome, "Synchronous expansion finished");
        outcome
    }

    fn filter_for(&self, key: &CacheKey) -> Arc<dyn ItemFilter> {
        self.inner.filters.filter_for(key, self.inner.clock.today())
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Rebuild `key` from scratch and wait for it. Joins a refresh already in
    /// flight instead of starting a second one.
    ///
    /// Returns the size of the stored collection.
    pub async fn force_warm(&self, key: CacheKey) -> MarqueeResult<usize> {
        match self.refresh_and_wait(key).await {
            TaskOutcome::Succeeded { collection_size } => Ok(collection_size),
            TaskOutcome::Skipped { .. } => Ok(self.inner.store.peek(&key)?.map_or(0, |s| s.len())),
            outcome => Err(unavailable(&key, Some(outcome))),
        }
    }

    /// Warm each key in turn. One key failing does not stop the others.
    pub async fn preload(&self, keys: &[CacheKey]) -> Vec<(CacheKey, MarqueeResult<usize>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let result = self.force_warm(*key).await;
            match &result {
                Ok(size) => tracing::info!(key = %key, items = size, "Preloaded collection"),
                Err(err) => tracing::warn!(key = %key, error = %err, "Preload failed"),
            }
            results.push((*key, result));
        }

        let warmed = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(requested = keys.len(), warmed, "Preload completed");
        results
    }

    /// Drop collections older than the eviction age. Returns how many went.
    pub fn evict_stale(&self) -> MarqueeResult<usize> {
        let evicted = self.inner.store.evict_stale()?;
        for key in &evicted {
            tracing::info!(key = %key, "Evicted stale collection");
        }
        Ok(evicted.len())
    }

    pub fn state_of(&self, key: &CacheKey) -> MarqueeResult<CollectionState> {
        let inner = &self.inner;
        let refreshing = inner.registry.is_in_flight(key, TaskKind::Refresh);
        let expanding = inner.registry.is_in_flight(key, TaskKind::Expansion);

        Ok(match inner.store.peek(key)? {
            Some(snapshot) => snapshot.state(inner.clock.now(), &inner.config, refreshing, expanding),
            None if refreshing => CollectionState::Warming,
            None => CollectionState::Absent,
        })
    }

    /// Statistics across every stored collection.
    pub fn stats(&self) -> MarqueeResult<EngineStats> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut keys: Vec<KeyFreshness> = inner
            .store
            .snapshots()?
            .into_iter()
            .map(|snapshot| {
                let refresh_in_flight = inner.registry.is_in_flight(&snapshot.key, TaskKind::Refresh);
                let expansion_in_flight =
                    inner.registry.is_in_flight(&snapshot.key, TaskKind::Expansion);
                KeyFreshness {
                    key: snapshot.key,
                    state: snapshot.state(now, &inner.config, refresh_in_flight, expansion_in_flight),
                    items: snapshot.len(),
                    last_refreshed_at: snapshot.meta.last_refreshed_at,
                    age_secs: snapshot.age(now).as_secs(),
                    expansion_level: snapshot.meta.expansion_level,
                    expansion_expires_in_secs: snapshot
                        .meta
                        .expansion_expires_at
                        .map(|at| (at - now).num_seconds().max(0) as u64),
                    pages_fetched: snapshot.meta.pages_fetched,
                    upstream_exhausted: snapshot.meta.upstream_exhausted,
                    refresh_in_flight,
                    expansion_in_flight,
                }
            })
            .collect();
        keys.sort_by_key(|row| row.key.to_string());

        Ok(EngineStats {
            collections: keys.len(),
            total_items: keys.iter().map(|row| row.items).sum(),
            hits: inner.store.hits(),
            misses: inner.store.misses(),
            in_flight_tasks: inner.registry.in_flight_count(),
            keys,
        })
    }
}

/// Changes whenever a collection is rebuilt or grown.
fn progress_marker(snapshot: &CollectionSnapshot) -> (u64, u32, u32) {
    let meta = &snapshot.meta;
    (meta.generation, meta.expansion_level, meta.pages_fetched)
}

fn unavailable(key: &CacheKey, outcome: Option<TaskOutcome>) -> MarqueeError {
    match outcome {
        Some(TaskOutcome::Abandoned) => CollectionError::TaskAbandoned {
            key: key.to_string(),
            task: TaskKind::Refresh.as_str().to_string(),
        }
        .into(),
        Some(TaskOutcome::Failed { reason }) | Some(TaskOutcome::Skipped { reason }) => {
            CollectionError::Unavailable {
                key: key.to_string(),
                reason,
            }
            .into()
        }
        _ => CollectionError::Unavailable {
            key: key.to_string(),
            reason: "no collection stored".to_string(),
        }
        .into(),
    }
}
