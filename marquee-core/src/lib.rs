//! MARQUEE Core - Catalog Types
//!
//! Data types, configuration, errors and collaborator traits shared by every
//! MARQUEE crate. The engine itself lives in `marquee-cache`; this crate holds
//! no caching behavior.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod page;
pub mod upstream;

pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use error::{
    CollectionError, ConfigError, MarqueeError, MarqueeResult, UpstreamError, ValidationError,
};
pub use page::{ExpansionTrigger, PageRequest, PageResult, PageSource};
pub use upstream::{
    AcceptAll, FilterProvider, ItemFilter, ItemProcessor, RawItem, ReleaseWindow,
    UpstreamClient, UpstreamPage, UpstreamRequest,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Upstream-assigned catalog identifier. Stable across fetches.
pub type ItemId = u64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Genre identifier as assigned by the upstream catalog.
pub type GenreId = u32;

// ============================================================================
// CACHE KEY COMPONENTS
// ============================================================================

/// Which slice of the catalog a collection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Titles whose release lies ahead of today.
    Upcoming,
    /// Titles released within the recent window.
    RecentReleases,
    /// Popular titles regardless of release date.
    Popular,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Upcoming => "upcoming",
            CollectionKind::RecentReleases => "recent",
            CollectionKind::Popular => "popular",
        }
    }

    /// Date window and region the upstream is queried with for this kind.
    pub fn window(&self, today: NaiveDate, config: &EngineConfig) -> ReleaseWindow {
        let region = config.region.clone();
        match self {
            // Out-of-range spans leave that side of the window open.
            CollectionKind::Upcoming => ReleaseWindow {
                region,
                from: Some(today),
                to: window_days(config.upcoming_window_days)
                    .and_then(|days| today.checked_add_days(days)),
            },
            CollectionKind::RecentReleases => ReleaseWindow {
                region,
                from: window_days(config.recent_window_days)
                    .and_then(|days| today.checked_sub_days(days)),
                to: Some(today),
            },
            CollectionKind::Popular => ReleaseWindow {
                region,
                from: None,
                to: None,
            },
        }
    }
}

fn window_days(days: i64) -> Option<chrono::Days> {
    u64::try_from(days).ok().map(chrono::Days::new)
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upcoming" => Ok(CollectionKind::Upcoming),
            "recent" | "recent_releases" | "recent-releases" => Ok(CollectionKind::RecentReleases),
            "popular" => Ok(CollectionKind::Popular),
            _ => Err(ValidationError::InvalidValue {
                field: "collection_kind".to_string(),
                reason: format!("unknown collection kind '{}'", s),
            }),
        }
    }
}

/// Ordering applied to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStrategy {
    /// Soonest display date first.
    ReleaseDateAsc,
    /// Latest display date first.
    ReleaseDateDesc,
    /// Most popular first.
    PopularityDesc,
    /// Highest quality score first (rating weighted by log-popularity).
    QualityDesc,
}

impl SortStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortStrategy::ReleaseDateAsc => "release_date_asc",
            SortStrategy::ReleaseDateDesc => "release_date_desc",
            SortStrategy::PopularityDesc => "popularity_desc",
            SortStrategy::QualityDesc => "quality_desc",
        }
    }

    /// Sort order requested from the upstream catalog.
    ///
    /// Quality has no upstream equivalent, so it is fetched by popularity and
    /// re-ordered locally.
    pub fn upstream_sort_hint(&self) -> &'static str {
        match self {
            SortStrategy::ReleaseDateAsc => "primary_release_date.asc",
            SortStrategy::ReleaseDateDesc => "primary_release_date.desc",
            SortStrategy::PopularityDesc | SortStrategy::QualityDesc => "popularity.desc",
        }
    }

    /// Date-ordered collections go stale faster than popularity-ordered ones.
    pub fn is_date_sensitive(&self) -> bool {
        matches!(
            self,
            SortStrategy::ReleaseDateAsc | SortStrategy::ReleaseDateDesc
        )
    }
}

impl fmt::Display for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "release_date_asc" => Ok(SortStrategy::ReleaseDateAsc),
            "release_date_desc" => Ok(SortStrategy::ReleaseDateDesc),
            "popularity" | "popularity_desc" => Ok(SortStrategy::PopularityDesc),
            "quality" | "quality_desc" => Ok(SortStrategy::QualityDesc),
            _ => Err(ValidationError::InvalidValue {
                field: "sort_strategy".to_string(),
                reason: format!("unknown sort strategy '{}'", s),
            }),
        }
    }
}

/// Caller-level filter identity. The predicate itself is resolved through
/// [`FilterProvider`]; this value only distinguishes cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSignature {
    All,
    Genre(GenreId),
}

impl fmt::Display for FilterSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSignature::All => f.write_str("all"),
            FilterSignature::Genre(id) => write!(f, "genre:{}", id),
        }
    }
}

impl FromStr for FilterSignature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(FilterSignature::All);
        }
        s.strip_prefix("genre:")
            .and_then(|id| id.parse().ok())
            .map(FilterSignature::Genre)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "filter_signature".to_string(),
                reason: format!("expected 'all' or 'genre:<id>', got '{}'", s),
            })
    }
}

/// Composite lookup key of the collection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub kind: CollectionKind,
    pub sort: SortStrategy,
    pub filter: FilterSignature,
}

impl CacheKey {
    pub fn new(kind: CollectionKind, sort: SortStrategy, filter: FilterSignature) -> Self {
        Self { kind, sort, filter }
    }

    /// Keys worth warming at startup: each kind under its default sort, unfiltered.
    pub fn default_preload_set() -> Vec<CacheKey> {
        vec![
            CacheKey::new(
                CollectionKind::Upcoming,
                SortStrategy::ReleaseDateAsc,
                FilterSignature::All,
            ),
            CacheKey::new(
                CollectionKind::RecentReleases,
                SortStrategy::ReleaseDateDesc,
                FilterSignature::All,
            ),
            CacheKey::new(
                CollectionKind::Popular,
                SortStrategy::PopularityDesc,
                FilterSignature::All,
            ),
        ]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.sort, self.filter)
    }
}

impl FromStr for CacheKey {
    type Err = ValidationError;

    /// Parses the `kind/sort/filter` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '/');
        let (Some(kind), Some(sort), Some(filter)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ValidationError::InvalidValue {
                field: "cache_key".to_string(),
                reason: format!("expected 'kind/sort/filter', got '{}'", s),
            });
        };
        Ok(CacheKey::new(kind.parse()?, sort.parse()?, filter.parse()?))
    }
}

// ============================================================================
// CATALOG ITEM
// ============================================================================

/// An enriched catalog entry as stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    pub image_ref: Option<String>,
    /// Theatrical (primary) release date.
    pub release_date: Option<NaiveDate>,
    /// Digital/home release date when known.
    pub digital_release_date: Option<NaiveDate>,
    /// Date shown to users and used for date ordering.
    pub display_date: Option<NaiveDate>,
    pub popularity: Option<f64>,
    pub rating: Option<f64>,
    pub vote_count: u32,
    pub quality_score: Option<f64>,
    pub genre_ids: Vec<GenreId>,
}

impl CatalogItem {
    /// Build an item from raw upstream data without any per-item lookups.
    ///
    /// The display date falls back to the theatrical date.
    pub fn from_raw(raw: RawItem) -> Self {
        let quality_score = compute_quality_score(raw.vote_average, raw.popularity);
        Self {
            id: raw.id,
            title: raw.title,
            image_ref: raw.poster_path,
            release_date: raw.release_date,
            digital_release_date: None,
            display_date: raw.release_date,
            popularity: raw.popularity,
            rating: raw.vote_average,
            vote_count: raw.vote_count.unwrap_or(0),
            quality_score,
            genre_ids: raw.genre_ids,
        }
    }

    pub fn has_genre(&self, genre: GenreId) -> bool {
        self.genre_ids.contains(&genre)
    }
}

/// Rating weighted by log-popularity.
///
/// A handful of votes on an obscure title cannot outrank a widely seen one:
/// the weight grows with `ln(1 + popularity)`. Returns `None` when either
/// input is missing or not finite.
pub fn compute_quality_score(rating: Option<f64>, popularity: Option<f64>) -> Option<f64> {
    let (rating, popularity) = (rating?, popularity?);
    if !rating.is_finite() || !popularity.is_finite() {
        return None;
    }
    Some(rating * (1.0 + popularity.max(0.0)).ln())
}

// ============================================================================
// TESTS
// ============================================================================
