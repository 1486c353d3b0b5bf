#![allow(dead_code)]

use marquee_cache::{PaginationService, TaskKind};
use marquee_core::{
    AcceptAll, CacheKey, EngineConfig, FilterProvider, ItemId, PageRequest, PageResult,
};
use marquee_test_utils::{ManualClock, MockUpstream, PassthroughProcessor};
use std::collections::HashSet;
use std::sync::Arc;

pub struct Harness {
    pub service: PaginationService,
    pub upstream: Arc<MockUpstream>,
    pub clock: Arc<ManualClock>,
}

/// Engine over a mock upstream with an accept-all filter and a manual clock.
pub fn harness(config: EngineConfig, upstream: MockUpstream) -> Harness {
    harness_with_filters(config, upstream, AcceptAll)
}

/// Engine over a mock upstream with caller-supplied filters.
pub fn harness_with_filters(
    config: EngineConfig,
    upstream: MockUpstream,
    filters: impl FilterProvider + 'static,
) -> Harness {
    let upstream = Arc::new(upstream);
    let clock = Arc::new(ManualClock::at_base());
    let service = PaginationService::new(
        config,
        upstream.clone(),
        Arc::new(PassthroughProcessor),
        Arc::new(filters),
        clock.clone(),
    )
    .expect("Failed to build pagination service");
    Harness {
        service,
        upstream,
        clock,
    }
}

/// Wait until no refresh or expansion is running for `key`.
pub async fn settle(service: &PaginationService, key: &CacheKey) {
    loop {
        let waiter = service
            .registry()
            .waiter(key, TaskKind::Refresh)
            .or_else(|| service.registry().waiter(key, TaskKind::Expansion));
        match waiter {
            Some(waiter) => {
                waiter.finished().await;
            }
            None => break,
        }
    }
}

/// Page through `key` the way a "load more" client does, excluding every id
/// already shown, until an empty page comes back.
pub async fn browse(
    service: &PaginationService,
    key: CacheKey,
    page_size: usize,
    max_requests: u32,
) -> Vec<PageResult> {
    let mut shown: HashSet<ItemId> = HashSet::new();
    let mut pages = Vec::new();
    for page in 1..=max_requests {
        let result = service
            .get_page(PageRequest::new(key, page, page_size).excluding(shown.iter().copied()))
            .await
            .expect("page request failed");
        if result.is_empty() {
            break;
        }
        shown.extend(result.ids());
        pages.push(result);
    }
    pages
}
