//! Per-key single-flight registry for refresh and expansion tasks.
//!
//! The first caller to [`InFlightRegistry::claim`] a `(key, kind)` slot
//! becomes the leader and gets an [`InFlightGuard`]; everyone else gets an
//! [`InFlightWaiter`] observing the leader's progress through a watch
//! channel. A refresh publishes twice: once when a usable (quick-fetch)
//! collection is stored, and once when the task is finished.
//!
//! Dropping a guard without finishing it releases the slot and reports
//! [`TaskOutcome::Abandoned`], so waiters never hang on a panicked task.

use marquee_core::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Kind of collection mutation a slot guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Refresh,
    Expansion,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Refresh => "refresh",
            TaskKind::Expansion => "expansion",
        }
    }
}

/// Final result of a guarded task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task stored a collection of the given size.
    Succeeded { collection_size: usize },
    /// The task decided there was nothing to do.
    Skipped { reason: String },
    Failed { reason: String },
    /// The leader went away without finishing.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskStatus {
    Running,
    Published,
    Finished(TaskOutcome),
}

type SlotKey = (CacheKey, TaskKind);

/// Registry of running tasks. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<SlotKey, watch::Receiver<TaskStatus>>>,
}

/// Result of claiming a slot.
#[derive(Debug)]
pub enum Claim {
    Leader(InFlightGuard),
    Follower(InFlightWaiter),
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the `(key, kind)` slot, or join the task that holds it.
    pub fn claim(self: &Arc<Self>, key: CacheKey, kind: TaskKind) -> Claim {
        let mut slots = self.lock_slots();
        if let Some(rx) = slots.get(&(key, kind)) {
            return Claim::Follower(InFlightWaiter { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(TaskStatus::Running);
        slots.insert((key, kind), rx);
        Claim::Leader(InFlightGuard {
            registry: Arc::clone(self),
            key,
            kind,
            tx,
            finished: false,
        })
    }

    pub fn is_in_flight(&self, key: &CacheKey, kind: TaskKind) -> bool {
        self.lock_slots().contains_key(&(*key, kind))
    }

    /// Observe the running task for `(key, kind)`, if any.
    pub fn waiter(&self, key: &CacheKey, kind: TaskKind) -> Option<InFlightWaiter> {
        self.lock_slots()
            .get(&(*key, kind))
            .map(|rx| InFlightWaiter { rx: rx.clone() })
    }

    /// Number of running tasks across all keys.
    pub fn in_flight_count(&self) -> usize {
        self.lock_slots().len()
    }

    // Slots are inserted and removed whole, so a poisoned map is still consistent.
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<SlotKey, watch::Receiver<TaskStatus>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: CacheKey, kind: TaskKind) {
        self.lock_slots().remove(&(key, kind));
    }
}

/// Exclusive right to run the task for one `(key, kind)` slot.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    key: CacheKey,
    kind: TaskKind,
    tx: watch::Sender<TaskStatus>,
    finished: bool,
}

impl InFlightGuard {
    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Wake waiters that only need a usable collection. The slot stays held.
    pub fn publish(&self) {
        self.tx.send_if_modified(|status| {
            if *status == TaskStatus::Running {
                *status = TaskStatus::Published;
                true
            } else {
                false
            }
        });
    }

    /// A waiter on this guard's own task.
    pub fn subscribe(&self) -> InFlightWaiter {
        InFlightWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Release the slot and report the outcome to every waiter.
    pub fn finish(mut self, outcome: TaskOutcome) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: TaskOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Release before notifying: a waiter that retries must be able to claim.
        self.registry.release(self.key, self.kind);
        self.tx.send_replace(TaskStatus::Finished(outcome));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                key = %self.key,
                task = self.kind.as_str(),
                "In-flight task dropped without finishing"
            );
            self.complete(TaskOutcome::Abandoned);
        }
    }
}

/// Read side of a running task.
#[derive(Debug, Clone)]
pub struct InFlightWaiter {
    rx: watch::Receiver<TaskStatus>,
}

impl InFlightWaiter {
    /// Wait until the task has stored a usable collection or finished.
    ///
    /// Returns the outcome when the task is already finished, `None` when it
    /// only published.
    pub async fn published(&mut self) -> Option<TaskOutcome> {
        let status = self
            .rx
            .wait_for(|status| *status != TaskStatus::Running)
            .await
            .map(|status| (*status).clone());
        match status {
            Ok(TaskStatus::Finished(outcome)) => Some(outcome),
            Ok(_) => None,
            Err(_) => Some(TaskOutcome::Abandoned),
        }
    }

    /// Wait for the task to finish.
    pub async fn finished(mut self) -> TaskOutcome {
        let status = self
            .rx
            .wait_for(|status| matches!(status, TaskStatus::Finished(_)))
            .await
            .map(|status| (*status).clone());
        match status {
            Ok(TaskStatus::Finished(outcome)) => outcome,
            _ => TaskOutcome::Abandoned,
        }
    }
}
