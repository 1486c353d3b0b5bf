//! Stale Collection Sweeper
//!
//! Background task that periodically drops collections nobody has refreshed
//! within the eviction age. Collections that are still requested get
//! refreshed on access and never age out; abandoned keys (an old genre
//! filter, a sort nobody uses any more) do.
//!
//! # Example
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let interval = service.config().sweep_interval;
//! let handle = tokio::spawn(stale_sweep_task(service.clone(), interval, shutdown_rx));
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use crate::service::PaginationService;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters of sweeper activity.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Total collections evicted since startup
    pub collections_evicted: AtomicU64,

    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Total errors encountered while sweeping
    pub sweep_errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            collections_evicted: self.collections_evicted.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSnapshot {
    pub collections_evicted: u64,
    pub sweep_cycles: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Evict stale collections every `every` until `shutdown_rx` turns true.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn stale_sweep_task(
    service: PaginationService,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_interval = interval(every);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = every.as_secs(),
        eviction_age_secs = service.config().eviction_age.as_secs(),
        "Stale sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender means nobody can stop us any more; stop now.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Stale sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&service, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        collections_evicted = snapshot.collections_evicted,
        sweep_cycles = snapshot.sweep_cycles,
        sweep_errors = snapshot.sweep_errors,
        "Stale sweep task completed"
    );

    metrics
}

/// Perform one sweep cycle.
fn sweep_once(service: &PaginationService, metrics: &SweepMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    match service.evict_stale() {
        Ok(0) => tracing::trace!("Stale sweep completed with nothing to evict"),
        Ok(evicted) => {
            metrics
                .collections_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::info!(evicted, "Stale sweep cycle completed");
        }
        Err(e) => {
            tracing::error!(error = %e, "Stale sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
