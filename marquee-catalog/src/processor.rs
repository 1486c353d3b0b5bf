//! Release-date enrichment.
//!
//! Recent releases are shown by the date they became watchable at home, so
//! each title needs a release-calendar lookup the discover listing does not
//! carry. Lookups are slow, so results are cached per title for a while and
//! run with bounded concurrency. A title with no digital release yet is
//! cached only briefly; its date is usually announced later.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use crate::config::{DEFAULT_LOOKUP_CACHE_TTL_SECS, DEFAULT_LOOKUP_MISS_TTL_SECS};
use marquee_core::{
    CatalogItem, Clock, CollectionKind, ItemId, ItemProcessor, RawItem, SystemClock, Timestamp,
    UpstreamError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Per-title digital release lookup.
#[async_trait]
pub trait ReleaseDateLookup: Send + Sync {
    async fn digital_release_date(&self, id: ItemId) -> Result<Option<NaiveDate>, UpstreamError>;
}

/// Whether items of `kind` are displayed by their digital release date.
pub fn uses_digital_dates(kind: CollectionKind) -> bool {
    matches!(kind, CollectionKind::RecentReleases)
}

/// Date an item of `kind` is shown and ordered by.
pub fn display_date(
    kind: CollectionKind,
    theatrical: Option<NaiveDate>,
    digital: Option<NaiveDate>,
) -> Option<NaiveDate> {
    if uses_digital_dates(kind) {
        digital.or(theatrical)
    } else {
        theatrical
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedDate {
    date: Option<NaiveDate>,
    expires_at: Timestamp,
}

/// [`ItemProcessor`] that resolves display dates through a [`ReleaseDateLookup`].
pub struct ReleaseDateProcessor {
    lookup: Arc<dyn ReleaseDateLookup>,
    concurrency: usize,
    clock: Arc<dyn Clock>,
    found_ttl: chrono::Duration,
    missing_ttl: chrono::Duration,
    cache: Mutex<HashMap<ItemId, CachedDate>>,
}

impl ReleaseDateProcessor {
    pub fn new(lookup: Arc<dyn ReleaseDateLookup>, concurrency: usize) -> Self {
        Self {
            lookup,
            concurrency: concurrency.max(1),
            clock: Arc::new(SystemClock),
            found_ttl: chrono::Duration::seconds(DEFAULT_LOOKUP_CACHE_TTL_SECS as i64),
            missing_ttl: chrono::Duration::seconds(DEFAULT_LOOKUP_MISS_TTL_SECS as i64),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Time source for cache expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lifetimes of cached lookups that found a digital date and that did not.
    pub fn with_cache_ttls(mut self, found: Duration, missing: Duration) -> Self {
        self.found_ttl = chrono::Duration::from_std(found).unwrap_or(chrono::Duration::MAX);
        self.missing_ttl = chrono::Duration::from_std(missing).unwrap_or(chrono::Duration::MAX);
        self
    }

    /// Number of titles with a cached lookup result, expired ones included
    /// until the next lookup prunes them.
    pub fn cached_titles(&self) -> usize {
        self.cache().len()
    }

    // A panic mid-insert leaves at worst a missing entry; keep serving.
    fn cache(&self) -> MutexGuard<'_, HashMap<ItemId, CachedDate>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(&self, now: Timestamp, date: Option<NaiveDate>) -> Timestamp {
        let ttl = if date.is_some() {
            self.found_ttl
        } else {
            self.missing_ttl
        };
        now.checked_add_signed(ttl).unwrap_or(Timestamp::MAX_UTC)
    }

    /// Digital dates for `raw`, looking up only titles without a live cache
    /// entry.
    ///
    /// Failed lookups are left out of the map and retried on a later page.
    async fn digital_dates(
        &self,
        raw: &[RawItem],
    ) -> Result<HashMap<ItemId, Option<NaiveDate>>, UpstreamError> {
        let now = self.clock.now();
        let mut resolved = HashMap::with_capacity(raw.len());
        let mut missing = Vec::new();
        {
            let cache = self.cache();
            let mut queued = HashSet::new();
            for item in raw {
                match cache.get(&item.id).filter(|entry| entry.expires_at > now) {
                    Some(entry) => {
                        resolved.insert(item.id, entry.date);
                    }
                    None if queued.insert(item.id) => missing.push(item.id),
                    None => {}
                }
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        let lookup = &self.lookup;
        let results: Vec<(ItemId, Result<Option<NaiveDate>, UpstreamError>)> =
            stream::iter(missing)
                .map(|id| async move { (id, lookup.digital_release_date(id).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let attempted = results.len();
        let mut failures = 0usize;
        let mut last_error = None;
        {
            let now = self.clock.now();
            let mut cache = self.cache();
            cache.retain(|_, entry| entry.expires_at > now);
            for (id, result) in results {
                match result {
                    Ok(date) => {
                        let expires_at = self.expiry(now, date);
                        cache.insert(id, CachedDate { date, expires_at });
                        resolved.insert(id, date);
                    }
                    Err(err) => {
                        tracing::debug!(id, error = %err, "Release date lookup failed");
                        failures += 1;
                        last_error = Some(err);
                    }
                }
            }
        }

        if failures == attempted {
            if let Some(err) = last_error {
                return Err(UpstreamError::EnrichmentFailed {
                    reason: format!("all {} release date lookups failed: {}", attempted, err),
                });
            }
        }
        if failures > 0 {
            tracing::warn!(
                failures,
                attempted,
                "Some release date lookups failed; using theatrical dates"
            );
        }

        Ok(resolved)
    }
}

#[async_trait]
impl ItemProcessor for ReleaseDateProcessor {
    async fn enrich(
        &self,
        kind: CollectionKind,
        raw: Vec<RawItem>,
    ) -> Result<Vec<CatalogItem>, UpstreamError> {
        if !uses_digital_dates(kind) {
            return Ok(raw.into_iter().map(CatalogItem::from_raw).collect());
        }

        let digital = self.digital_dates(&raw).await?;
        Ok(raw
            .into_iter()
            .map(|raw| {
                let digital_date = digital.get(&raw.id).copied().flatten();
                let mut item = CatalogItem::from_raw(raw);
                item.digital_release_date = digital_date;
                item.display_date = display_date(kind, item.release_date, digital_date);
                item
            })
            .collect())
    }
}

impl std::fmt::Debug for ReleaseDateProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseDateProcessor")
            .field("concurrency", &self.concurrency)
            .field("cached_titles", &self.cached_titles())
            .finish()
    }
}
