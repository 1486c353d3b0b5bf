//! Exclusion-aware page extraction.
//!
//! Clients send every id they have already rendered. The page offset is
//! computed in the space of items the client has *not* seen: the excluded
//! ids that are still in the collection account for the earlier pages, so
//! only the remainder of the nominal offset is skipped. This keeps "load
//! more" gap-free even when the collection grew or reordered between calls.

use crate::dedup::find_duplicate_ids;
use marquee_core::{CatalogItem, ItemId};
use std::collections::HashSet;

/// A page cut from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PageExtract {
    pub items: Vec<CatalogItem>,
    pub has_more: bool,
    /// Unseen items available before the page was cut.
    pub total_count: usize,
    pub collection_size: usize,
    /// Unseen items left after this page.
    pub remaining_after: usize,
    pub duplicate_ids: Vec<ItemId>,
}

impl PageExtract {
    /// Fewer items than requested came back.
    pub fn is_partial(&self, page_size: usize) -> bool {
        self.items.len() < page_size
    }
}

/// Cut page `page` (1-based) of `page_size` items from `collection`,
/// skipping every id in `exclude_ids`.
pub fn extract_page(
    collection: &[CatalogItem],
    page: u32,
    page_size: usize,
    exclude_ids: &HashSet<ItemId>,
) -> PageExtract {
    let collection_size = collection.len();
    let seen = collection
        .iter()
        .filter(|item| exclude_ids.contains(&item.id))
        .count();
    let total_count = collection_size - seen;

    let nominal_offset = (page.saturating_sub(1) as usize).saturating_mul(page_size);
    let offset = nominal_offset.saturating_sub(seen).min(total_count);

    let items: Vec<CatalogItem> = collection
        .iter()
        .filter(|item| !exclude_ids.contains(&item.id))
        .skip(offset)
        .take(page_size)
        .cloned()
        .collect();

    let consumed = seen + offset + items.len();
    let duplicate_ids = find_duplicate_ids(&items);

    PageExtract {
        has_more: consumed < collection_size,
        total_count,
        collection_size,
        remaining_after: collection_size - consumed,
        duplicate_ids,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_test_utils::catalog_items;

    fn ids(extract: &PageExtract) -> Vec<u64> {
        extract.items.iter().map(|i| i.id).collect()
    }

    #[test]
    fn test_first_page_without_exclusions() {
        let collection = catalog_items(45);
        let page = extract_page(&collection, 1, 20, &HashSet::new());

        assert_eq!(ids(&page), (1..=20).collect::<Vec<_>>());
        assert!(page.has_more);
        assert_eq!(page.total_count, 45);
        assert_eq!(page.remaining_after, 25);
    }

    #[test]
    fn test_exclusions_replace_offset() {
        let collection = catalog_items(45);
        let seen: HashSet<u64> = (1..=20).collect();

        let page = extract_page(&collection, 2, 20, &seen);
        assert_eq!(ids(&page), (21..=40).collect::<Vec<_>>());
        assert_eq!(page.total_count, 25);
        assert!(page.has_more);
    }

    #[test]
    fn test_last_partial_page() {
        let collection = catalog_items(45);
        let seen: HashSet<u64> = (1..=40).collect();

        let page = extract_page(&collection, 3, 20, &seen);
        assert_eq!(ids(&page), (41..=45).collect::<Vec<_>>());
        assert!(!page.has_more);
        assert!(page.is_partial(20));
        assert_eq!(page.remaining_after, 0);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let collection = catalog_items(10);
        let page = extract_page(&collection, 5, 20, &HashSet::new());

        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total_count, 10);
    }

    #[test]
    fn test_excluded_ids_outside_collection_do_not_shift_offset() {
        let collection = catalog_items(30);
        // Ids 900.. were shown from an older version of the collection.
        let seen: HashSet<u64> = (1..=10).chain(900..910).collect();

        let page = extract_page(&collection, 2, 10, &seen);
        assert_eq!(ids(&page), (11..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_inserted_items_are_not_skipped() {
        // Client saw ids 1..=10 as page 1; the collection then gained
        // items that sort between them.
        let mut collection = catalog_items(20);
        let mut newcomer = collection[3].clone();
        newcomer.id = 500;
        collection.insert(4, newcomer);
        let seen: HashSet<u64> = (1..=10).collect();

        let page = extract_page(&collection, 2, 10, &seen);
        assert_eq!(page.items[0].id, 500);
        assert!(page.items.iter().all(|item| !seen.contains(&item.id)));
    }

    #[test]
    fn test_empty_collection() {
        let page = extract_page(&[], 1, 20, &HashSet::new());
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.collection_size, 0);
    }
}
