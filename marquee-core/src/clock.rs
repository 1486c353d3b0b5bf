//! Time source for freshness decisions.

use crate::Timestamp;
use chrono::{NaiveDate, Utc};

/// Source of "now" for freshness and expiry checks.
///
/// The engine never calls `Utc::now()` directly so tests can drive TTLs with
/// a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Calendar date of `now()` in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
