//! Collaborator boundaries: upstream catalog, item enrichment, filters.
//!
//! The engine drives these traits but owns none of their behavior. The
//! upstream is slow, rate limited and occasionally wrong about its own page
//! count; the engine budgets for all three.

use crate::{CacheKey, CatalogItem, CollectionKind, GenreId, ItemId, UpstreamError};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// WIRE-LEVEL TYPES
// ============================================================================

/// One catalog entry as returned by the upstream list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<u32>,
    #[serde(default)]
    pub genre_ids: Vec<GenreId>,
}

/// Date range and region an upstream listing is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseWindow {
    pub region: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ReleaseWindow {
    /// Inclusive containment check. Open bounds accept everything.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Parameters of a single upstream page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub sort_hint: &'static str,
    /// 1-based page number.
    pub page: u32,
    pub window: ReleaseWindow,
}

/// One page of upstream results plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpstreamPage {
    pub items: Vec<RawItem>,
    pub total_pages: u32,
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Page-based upstream catalog.
///
/// Implementations must tolerate being called with a page beyond the last
/// one; returning an empty page is acceptable.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_page(&self, request: &UpstreamRequest) -> Result<UpstreamPage, UpstreamError>;
}

/// Turns raw upstream entries into catalog items with derived fields.
///
/// May perform (and cache) per-item lookups, so it is slower for titles it
/// has not seen before. Output order need not match input order.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn enrich(
        &self,
        kind: CollectionKind,
        raw: Vec<RawItem>,
    ) -> Result<Vec<CatalogItem>, UpstreamError>;
}

/// Caller-supplied business predicate applied after enrichment.
pub trait ItemFilter: Send + Sync {
    fn matches(&self, item: &CatalogItem) -> bool;
}

impl<F> ItemFilter for F
where
    F: Fn(&CatalogItem) -> bool + Send + Sync,
{
    fn matches(&self, item: &CatalogItem) -> bool {
        self(item)
    }
}

/// Resolves the predicate that backs a cache key's filter signature.
pub trait FilterProvider: Send + Sync {
    fn filter_for(&self, key: &CacheKey, today: NaiveDate) -> Arc<dyn ItemFilter>;
}

/// Filter that keeps every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ItemFilter for AcceptAll {
    fn matches(&self, _item: &CatalogItem) -> bool {
        true
    }
}

impl FilterProvider for AcceptAll {
    fn filter_for(&self, _key: &CacheKey, _today: NaiveDate) -> Arc<dyn ItemFilter> {
        Arc::new(AcceptAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_contains_is_inclusive() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let window = ReleaseWindow {
            region: None,
            from: Some(from),
            to: Some(to),
        };
        assert!(window.contains(from));
        assert!(window.contains(to));
        assert!(!window.contains(to + chrono::Duration::days(1)));
        assert!(ReleaseWindow::default().contains(from));
    }

    #[test]
    fn test_closure_is_a_filter() {
        let only_even = |item: &CatalogItem| item.id % 2 == 0;
        let raw = RawItem {
            id: 4,
            title: "Four".to_string(),
            poster_path: None,
            release_date: None,
            popularity: None,
            vote_average: None,
            vote_count: None,
            genre_ids: vec![],
        };
        assert!(only_even.matches(&CatalogItem::from_raw(raw)));
    }

    #[test]
    fn test_raw_item_deserializes_with_missing_fields() {
        let raw: RawItem = serde_json::from_str(r#"{"id": 7, "title": "Seven"}"#).unwrap();
        assert_eq!(raw.id, 7);
        assert!(raw.release_date.is_none());
        assert!(raw.genre_ids.is_empty());
    }
}
