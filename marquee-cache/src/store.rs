//! Keyed collection store.
//!
//! Each [`CacheKey`] maps to an immutable, sorted, deduplicated item list
//! plus refresh and expansion metadata. Readers get an `Arc` snapshot and
//! slice it without holding the lock; writers swap whole snapshots, so no
//! reader ever observes a half-merged collection.
//!
//! Every wholesale replacement bumps the entry's generation. An expansion
//! computed against an older generation is discarded instead of merged into
//! a collection it was not fetched for.

use crate::dedup::dedupe_against;
use crate::sort::sort_items;
use crate::stats::CollectionState;
use marquee_core::{
    CacheKey, CatalogItem, Clock, CollectionError, EngineConfig, MarqueeResult, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

// ============================================================================
// SNAPSHOT TYPES
// ============================================================================

/// Bookkeeping stored next to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    pub last_refreshed_at: Timestamp,
    pub last_accessed_at: Timestamp,
    /// Completed expansion passes since the last full warm.
    pub expansion_level: u32,
    pub expansion_expires_at: Option<Timestamp>,
    /// Highest upstream page requested so far.
    pub pages_fetched: u32,
    pub upstream_total_pages: Option<u32>,
    pub upstream_exhausted: bool,
    pub generation: u64,
    /// Set for quick-fetch collections and after an expansion reset; the next
    /// access schedules a full warm.
    pub rebuild_requested: bool,
}

/// A collection as seen at one instant.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub key: CacheKey,
    pub items: Arc<[CatalogItem]>,
    pub meta: CollectionMetadata,
}

impl CollectionSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn age(&self, now: Timestamp) -> Duration {
        elapsed(now, self.meta.last_refreshed_at)
    }

    /// Past the refresh interval of its sort, or explicitly marked for rebuild.
    pub fn needs_full_refresh(&self, now: Timestamp, config: &EngineConfig) -> bool {
        self.meta.rebuild_requested || self.age(now) > config.refresh_interval_for(self.key.sort)
    }

    pub fn expansion_expired(&self, now: Timestamp) -> bool {
        self.meta.expansion_level > 0
            && self
                .meta
                .expansion_expires_at
                .is_some_and(|expires_at| now >= expires_at)
    }

    /// Whether another expansion pass could add items.
    pub fn can_expand(&self, config: &EngineConfig) -> bool {
        !self.meta.upstream_exhausted
            && !self.meta.rebuild_requested
            && self.meta.expansion_level < config.max_expansion_level
    }

    pub fn state(
        &self,
        now: Timestamp,
        config: &EngineConfig,
        refresh_in_flight: bool,
        expansion_in_flight: bool,
    ) -> CollectionState {
        if expansion_in_flight {
            CollectionState::Expanding
        } else if refresh_in_flight || self.needs_full_refresh(now, config) {
            CollectionState::Stale
        } else if self.meta.expansion_level > 0 {
            CollectionState::Expanded
        } else {
            CollectionState::Fresh
        }
    }
}

/// Output of a warm pass, ready to replace a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmedCollection {
    pub items: Vec<CatalogItem>,
    pub pages_fetched: u32,
    pub upstream_total_pages: Option<u32>,
    pub upstream_exhausted: bool,
    /// The pass stopped on a failure budget rather than a natural end.
    pub aborted: bool,
}

impl WarmedCollection {
    /// Nothing left to fetch for a full warm of `target_size` items.
    pub fn is_complete(&self, target_size: usize, max_pages: u32) -> bool {
        self.upstream_exhausted || self.items.len() >= target_size || self.pages_fetched >= max_pages
    }
}

/// New items from an expansion pass, tagged with the generation they extend.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionBatch {
    pub base_generation: u64,
    pub items: Vec<CatalogItem>,
    pub pages_fetched: u32,
    pub upstream_total_pages: Option<u32>,
    pub upstream_exhausted: bool,
}

// ============================================================================
// STORE
// ============================================================================

/// In-process store of sorted collections.
pub struct CollectionStore {
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<CacheKey, CollectionSnapshot>>,
    next_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CollectionStore {
    pub fn new(config: Arc<EngineConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Snapshot for serving a request. Counts a hit or miss and marks the
    /// entry as accessed.
    pub fn get(&self, key: &CacheKey) -> MarqueeResult<Option<CollectionSnapshot>> {
        let now = self.clock.now();
        let mut entries = self.write()?;
        match entries.get_mut(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry.meta.last_accessed_at = now;
                Ok(Some(entry.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Snapshot without touching statistics.
    pub fn peek(&self, key: &CacheKey) -> MarqueeResult<Option<CollectionSnapshot>> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Replace the collection for `key` with a warm result.
    ///
    /// Resets expansion state and starts a new generation. A `provisional`
    /// collection (quick fetch) is marked for rebuild.
    pub fn replace(
        &self,
        key: CacheKey,
        warmed: WarmedCollection,
        provisional: bool,
    ) -> MarqueeResult<CollectionSnapshot> {
        let now = self.clock.now();
        let WarmedCollection {
            mut items,
            pages_fetched,
            upstream_total_pages,
            upstream_exhausted,
            ..
        } = warmed;
        sort_items(&mut items, key.sort);

        let snapshot = CollectionSnapshot {
            key,
            items: items.into(),
            meta: CollectionMetadata {
                last_refreshed_at: now,
                last_accessed_at: now,
                expansion_level: 0,
                expansion_expires_at: None,
                pages_fetched,
                upstream_total_pages,
                upstream_exhausted,
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                rebuild_requested: provisional,
            },
        };

        self.write()?.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Merge an expansion batch into the collection it was fetched for.
    ///
    /// Returns the number of items added, or `None` when the collection is
    /// gone or was rebuilt since the batch started.
    pub fn apply_expansion(&self, key: &CacheKey, batch: ExpansionBatch) -> MarqueeResult<Option<usize>> {
        let now = self.clock.now();
        let mut entries = self.write()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if entry.meta.generation != batch.base_generation {
            return Ok(None);
        }

        let fresh = dedupe_against(batch.items, &entry.items);
        let added = fresh.len();
        if added > 0 {
            let mut merged = Vec::with_capacity(entry.items.len() + added);
            merged.extend_from_slice(&entry.items);
            merged.extend(fresh);
            sort_items(&mut merged, key.sort);
            entry.items = merged.into();
        }

        let meta = &mut entry.meta;
        meta.pages_fetched = meta.pages_fetched.max(batch.pages_fetched);
        meta.upstream_total_pages = batch.upstream_total_pages.or(meta.upstream_total_pages);
        meta.upstream_exhausted = batch.upstream_exhausted;
        meta.expansion_level = (meta.expansion_level + 1).min(self.config.max_expansion_level);
        meta.expansion_expires_at = chrono::Duration::from_std(self.config.expansion_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        Ok(Some(added))
    }

    /// Reset an elapsed expansion to level 0 and mark the collection for a
    /// full rebuild. Returns whether a reset happened.
    pub fn reset_expired_expansion(&self, key: &CacheKey) -> MarqueeResult<bool> {
        let now = self.clock.now();
        let mut entries = self.write()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        if !entry.expansion_expired(now) {
            return Ok(false);
        }

        tracing::info!(
            key = %key,
            level = entry.meta.expansion_level,
            items = entry.items.len(),
            "Expansion window elapsed; resetting to base depth"
        );
        entry.meta.expansion_level = 0;
        entry.meta.expansion_expires_at = None;
        entry.meta.rebuild_requested = true;
        Ok(true)
    }

    /// Remove every collection older than the eviction age. Returns the
    /// evicted keys.
    pub fn evict_stale(&self) -> MarqueeResult<Vec<CacheKey>> {
        let now = self.clock.now();
        let max_age = self.config.eviction_age;
        let mut entries = self.write()?;

        let expired: Vec<CacheKey> = entries
            .values()
            .filter(|entry| entry.age(now) > max_age)
            .map(|entry| entry.key)
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        Ok(expired)
    }

    pub fn remove(&self, key: &CacheKey) -> MarqueeResult<bool> {
        Ok(self.write()?.remove(key).is_some())
    }

    pub fn snapshots(&self) -> MarqueeResult<Vec<CollectionSnapshot>> {
        Ok(self.read()?.values().cloned().collect())
    }

    pub fn len(&self) -> MarqueeResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> MarqueeResult<bool> {
        Ok(self.read()?.is_empty())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<CacheKey, CollectionSnapshot>>, CollectionError> {
        self.entries.read().map_err(|_| CollectionError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<CacheKey, CollectionSnapshot>>, CollectionError> {
        self.entries.write().map_err(|_| CollectionError::LockPoisoned)
    }
}

fn elapsed(now: Timestamp, since: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

// ============================================================================
// TESTS
// ============================================================================
