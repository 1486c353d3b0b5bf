//! Business filters applied while collections are assembled.

use chrono::NaiveDate;
use marquee_core::{
    CacheKey, CatalogItem, EngineConfig, FilterProvider, FilterSignature, GenreId, ItemFilter,
    ReleaseWindow,
};
use std::sync::Arc;

/// Keeps items a user can still follow: display date inside the window.
///
/// Undated items only pass an unbounded window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowableWindow {
    window: ReleaseWindow,
}

impl FollowableWindow {
    pub fn new(window: ReleaseWindow) -> Self {
        Self { window }
    }

    fn is_unbounded(&self) -> bool {
        self.window.from.is_none() && self.window.to.is_none()
    }
}

impl ItemFilter for FollowableWindow {
    fn matches(&self, item: &CatalogItem) -> bool {
        match item.display_date {
            Some(date) => self.window.contains(date),
            None => self.is_unbounded(),
        }
    }
}

/// Keeps items tagged with a genre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenreMatch(pub GenreId);

impl ItemFilter for GenreMatch {
    fn matches(&self, item: &CatalogItem) -> bool {
        item.has_genre(self.0)
    }
}

/// Conjunction of filters. Empty accepts everything.
#[derive(Default, Clone)]
pub struct AllOf {
    filters: Vec<Arc<dyn ItemFilter>>,
}

impl AllOf {
    pub fn new(filters: Vec<Arc<dyn ItemFilter>>) -> Self {
        Self { filters }
    }

    pub fn with(mut self, filter: impl ItemFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ItemFilter for AllOf {
    fn matches(&self, item: &CatalogItem) -> bool {
        self.filters.iter().all(|filter| filter.matches(item))
    }
}

impl std::fmt::Debug for AllOf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllOf")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Maps cache keys to the release window of their kind plus their genre.
#[derive(Debug, Clone)]
pub struct CatalogFilterProvider {
    config: Arc<EngineConfig>,
}

impl CatalogFilterProvider {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// The concrete conjunction backing `key` on `today`.
    pub fn build(&self, key: &CacheKey, today: NaiveDate) -> AllOf {
        let filter = AllOf::default().with(FollowableWindow::new(
            key.kind.window(today, &self.config),
        ));
        match key.filter {
            FilterSignature::All => filter,
            FilterSignature::Genre(genre) => filter.with(GenreMatch(genre)),
        }
    }
}

impl FilterProvider for CatalogFilterProvider {
    fn filter_for(&self, key: &CacheKey, today: NaiveDate) -> Arc<dyn ItemFilter> {
        Arc::new(self.build(key, today))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::{CollectionKind, RawItem, SortStrategy};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(id: u64, release: Option<NaiveDate>, genres: Vec<GenreId>) -> CatalogItem {
        CatalogItem::from_raw(RawItem {
            id,
            title: format!("Title {}", id),
            poster_path: None,
            release_date: release,
            popularity: Some(1.0),
            vote_average: Some(6.0),
            vote_count: Some(10),
            genre_ids: genres,
        })
    }

    #[test]
    fn test_followable_window_bounds() {
        let filter = FollowableWindow::new(ReleaseWindow {
            region: None,
            from: Some(date(2026, 3, 1)),
            to: Some(date(2026, 3, 31)),
        });
        assert!(filter.matches(&item(1, Some(date(2026, 3, 1)), vec![])));
        assert!(!filter.matches(&item(2, Some(date(2026, 2, 28)), vec![])));
        assert!(!filter.matches(&item(3, None, vec![])));

        let open = FollowableWindow::new(ReleaseWindow::default());
        assert!(open.matches(&item(4, None, vec![])));
    }

    #[test]
    fn test_all_of_requires_every_filter() {
        let both = AllOf::default().with(GenreMatch(28)).with(GenreMatch(12));
        assert_eq!(both.len(), 2);
        assert!(both.matches(&item(1, None, vec![28, 12])));
        assert!(!both.matches(&item(2, None, vec![28])));
        assert!(AllOf::default().matches(&item(3, None, vec![])));
    }

    #[test]
    fn test_provider_combines_window_and_genre() {
        let provider = CatalogFilterProvider::new(Arc::new(EngineConfig::default()));
        let today = date(2026, 3, 1);
        let key = CacheKey::new(
            CollectionKind::Upcoming,
            SortStrategy::ReleaseDateAsc,
            FilterSignature::Genre(28),
        );

        let filter = provider.filter_for(&key, today);
        assert!(filter.matches(&item(1, Some(date(2026, 4, 1)), vec![28])));
        assert!(!filter.matches(&item(2, Some(date(2026, 4, 1)), vec![35])));
        assert!(!filter.matches(&item(3, Some(date(2026, 2, 1)), vec![28])));

        let popular = CacheKey::new(
            CollectionKind::Popular,
            SortStrategy::PopularityDesc,
            FilterSignature::All,
        );
        assert_eq!(provider.build(&popular, today).len(), 1);
        assert!(provider
            .filter_for(&popular, today)
            .matches(&item(4, None, vec![])));
    }
}
