//! Total orders over catalog items, one per sort strategy.
//!
//! Every order is total and deterministic: items lacking the sort field go
//! last, and ties break on ascending id. Re-sorting a collection therefore
//! never reshuffles pages a client has already seen.

use marquee_core::{CatalogItem, SortStrategy};
use std::cmp::Ordering;

/// Compare two items under `strategy`.
pub fn compare_items(a: &CatalogItem, b: &CatalogItem, strategy: SortStrategy) -> Ordering {
    let primary = match strategy {
        SortStrategy::ReleaseDateAsc => present_first(a.display_date, b.display_date, |x, y| x.cmp(&y)),
        SortStrategy::ReleaseDateDesc => present_first(a.display_date, b.display_date, |x, y| y.cmp(&x)),
        SortStrategy::PopularityDesc => present_first(a.popularity, b.popularity, |x, y| y.total_cmp(&x)),
        SortStrategy::QualityDesc => present_first(a.quality_score, b.quality_score, |x, y| y.total_cmp(&x)),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Sort in place. Stable, though the id tie-break makes stability moot.
pub fn sort_items(items: &mut [CatalogItem], strategy: SortStrategy) {
    items.sort_by(|a, b| compare_items(a, b, strategy));
}

/// Whether `items` is already ordered under `strategy`.
pub fn is_sorted(items: &[CatalogItem], strategy: SortStrategy) -> bool {
    items
        .windows(2)
        .all(|pair| compare_items(&pair[0], &pair[1], strategy) != Ordering::Greater)
}

// Missing values sort after present ones regardless of direction.
fn present_first<T, F>(a: Option<T>, b: Option<T>, cmp: F) -> Ordering
where
    F: FnOnce(T, T) -> Ordering,
{
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
