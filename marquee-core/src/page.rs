//! Page request and result types.

use crate::{CacheKey, CatalogItem, ItemId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a page request interacted with collection expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionTrigger {
    /// No expansion was needed or possible.
    #[default]
    None,
    /// An expansion was started for the benefit of later requests.
    Background,
    /// The request waited for an expansion before answering.
    Synchronous,
}

/// Where the returned page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    /// A fresh cached collection.
    Cache,
    /// A stale collection served while a rebuild runs.
    Stale,
    /// A small inline fetch answering a cold-cache request.
    QuickFetch,
}

/// A page request. `exclude_ids` carries every id the client has already
/// rendered in this browsing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub key: CacheKey,
    /// 1-based page number.
    pub page: u32,
    pub page_size: usize,
    pub exclude_ids: HashSet<ItemId>,
}

impl PageRequest {
    pub fn new(key: CacheKey, page: u32, page_size: usize) -> Self {
        Self {
            key,
            page,
            page_size,
            exclude_ids: HashSet::new(),
        }
    }

    /// Add ids the client has already shown.
    pub fn excluding<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = ItemId>,
    {
        self.exclude_ids.extend(ids);
        self
    }

    pub fn validate(&self, max_page_size: usize) -> Result<(), ValidationError> {
        if self.page == 0 {
            return Err(ValidationError::InvalidValue {
                field: "page".to_string(),
                reason: "pages are 1-based".to_string(),
            });
        }
        if self.page_size == 0 || self.page_size > max_page_size {
            return Err(ValidationError::InvalidValue {
                field: "page_size".to_string(),
                reason: format!("must be between 1 and {}", max_page_size),
            });
        }
        Ok(())
    }
}

/// A page of items plus diagnostic metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub items: Vec<CatalogItem>,
    pub has_more: bool,
    /// Unseen items the collection held before this page was cut.
    pub total_count: usize,
    /// Size of the backing collection.
    pub collection_size: usize,
    pub expansion_triggered: ExpansionTrigger,
    pub served_from: PageSource,
    /// Ids returned more than once. Non-empty means an integrity violation.
    pub duplicate_ids: Vec<ItemId>,
}

impl PageResult {
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
