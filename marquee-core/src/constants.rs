//! Default values for engine configuration.
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// PAGINATION
// ============================================================================

/// Default page size for `get_page` requests
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum page size accepted from callers
pub const MAX_PAGE_SIZE: usize = 100;

// ============================================================================
// WARMING
// ============================================================================

/// Items a full warm tries to collect
pub const DEFAULT_WARM_TARGET_SIZE: usize = 400;

/// Upstream pages a full warm may fetch before giving up on the target
pub const DEFAULT_WARM_MAX_PAGES: u32 = 25;

/// Upstream pages fetched inline to answer a cold-cache request
pub const DEFAULT_QUICK_FETCH_PAGES: u32 = 2;

/// Delay between consecutive upstream calls (milliseconds)
pub const DEFAULT_PAGE_DELAY_MS: u64 = 250;

/// Consecutive failed pages tolerated before a pass aborts
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Consecutive empty pages tolerated before a pass aborts
pub const DEFAULT_MAX_CONSECUTIVE_EMPTY_PAGES: u32 = 3;

// ============================================================================
// FRESHNESS
// ============================================================================

/// Refresh interval for date-ordered collections (15 minutes)
pub const DEFAULT_DATE_REFRESH_SECS: u64 = 15 * 60;

/// Refresh interval for popularity-ordered collections (30 minutes)
pub const DEFAULT_POPULARITY_REFRESH_SECS: u64 = 30 * 60;

/// Age after which a collection is evicted by the sweeper (2 hours)
pub const DEFAULT_EVICTION_AGE_SECS: u64 = 2 * 60 * 60;

/// How often the sweeper runs (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

// ============================================================================
// EXPANSION
// ============================================================================

/// Pages of headroom below which expansion fires proactively
pub const DEFAULT_EXPANSION_BUFFER_PAGES: usize = 2;

/// Upstream pages fetched per expansion level
pub const DEFAULT_EXPANSION_STEP_PAGES: u32 = 10;

/// Highest expansion level a collection may reach before a rebuild
pub const DEFAULT_MAX_EXPANSION_LEVEL: u32 = 3;

/// Lifetime of an expanded collection (10 minutes)
pub const DEFAULT_EXPANSION_TTL_SECS: u64 = 10 * 60;

// ============================================================================
// RELEASE WINDOWS
// ============================================================================

/// Days ahead covered by the upcoming collection
pub const DEFAULT_UPCOMING_WINDOW_DAYS: i64 = 180;

/// Days back covered by the recent-releases collection
pub const DEFAULT_RECENT_WINDOW_DAYS: i64 = 60;

/// Upper bound for either release window (ten years)
pub const MAX_WINDOW_DAYS: i64 = 3650;
