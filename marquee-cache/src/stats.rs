//! Engine statistics.

use marquee_core::{CacheKey, Timestamp};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    Absent,
    /// First build in progress, nothing stored yet.
    Warming,
    Fresh,
    /// Past its refresh interval, or only a quick fetch is stored.
    Stale,
    Expanding,
    /// Grown beyond the base warm depth.
    Expanded,
}

/// Freshness report for one cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFreshness {
    pub key: CacheKey,
    pub state: CollectionState,
    pub items: usize,
    pub last_refreshed_at: Timestamp,
    pub age_secs: u64,
    pub expansion_level: u32,
    /// Seconds until the expansion resets; `None` at level 0.
    pub expansion_expires_in_secs: Option<u64>,
    pub pages_fetched: u32,
    pub upstream_exhausted: bool,
    pub refresh_in_flight: bool,
    pub expansion_in_flight: bool,
}

/// Aggregate statistics across all collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub collections: usize,
    pub total_items: usize,
    pub hits: u64,
    pub misses: u64,
    pub in_flight_tasks: usize,
    pub keys: Vec<KeyFreshness>,
}

impl EngineStats {
    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn key(&self, key: &CacheKey) -> Option<&KeyFreshness> {
        self.keys.iter().find(|row| &row.key == key)
    }
}
