//! Identity-based deduplication.
//!
//! Upstream pages overlap when the catalog shifts between calls, so every
//! batch is deduplicated within itself and against the accumulator before
//! it is appended.

use marquee_core::{CatalogItem, ItemId};
use std::collections::{HashMap, HashSet};

/// Index of the ids present in `items`.
pub fn id_index(items: &[CatalogItem]) -> HashSet<ItemId> {
    items.iter().map(|item| item.id).collect()
}

/// Keep only items whose id is absent from `existing`.
///
/// Repeats inside `new_items` are dropped as well; the first occurrence wins.
pub fn dedupe(new_items: Vec<CatalogItem>, existing: &HashSet<ItemId>) -> Vec<CatalogItem> {
    let mut batch_ids = HashSet::with_capacity(new_items.len());
    new_items
        .into_iter()
        .filter(|item| !existing.contains(&item.id) && batch_ids.insert(item.id))
        .collect()
}

/// [`dedupe`] against a list instead of a prebuilt index.
pub fn dedupe_against(new_items: Vec<CatalogItem>, existing: &[CatalogItem]) -> Vec<CatalogItem> {
    dedupe(new_items, &id_index(existing))
}

/// Ids occurring more than once in `items`, ascending.
pub fn find_duplicate_ids(items: &[CatalogItem]) -> Vec<ItemId> {
    let mut counts: HashMap<ItemId, usize> = HashMap::with_capacity(items.len());
    for item in items {
        *counts.entry(item.id).or_insert(0) += 1;
    }
    let mut duplicates: Vec<ItemId> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect();
    duplicates.sort_unstable();
    duplicates
}
