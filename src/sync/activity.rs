//! ActivityTracker — recent-edit signal for adaptive sync cadence.
//!
//! Lock-free: a single atomic timestamp of the last local edit. The
//! scheduler polls `current_interval_ms()` each loop pass, so sync runs
//! every second while the user is actively editing and backs off to five
//! minutes when the app sits idle.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::reactive::{StoreEvents, Subscription, WriteSource};
use crate::types::now_ms;

#[derive(Debug, Default)]
pub struct ActivityTracker {
    /// Epoch ms of the last recorded local edit; 0 = never.
    last_activity_ms: AtomicI64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local edit at the current time.
    pub fn record_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the last recorded edit. Very large when nothing
    /// was ever recorded.
    pub fn millis_since_activity(&self) -> i64 {
        now_ms().saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Sync interval for the current quiet period.
    pub fn current_interval_ms(&self) -> u64 {
        Self::interval_for_quiet(self.millis_since_activity())
    }

    /// Subscribe the tracker to a store's event bus. Only `Local` writes
    /// count as activity — remote applies and seeding are not user edits.
    pub fn attach(self: &Arc<Self>, events: &StoreEvents) -> Subscription {
        let tracker = Arc::clone(self);
        events.subscribe(move |event| {
            if event.source == WriteSource::Local {
                tracker.record_activity();
            }
        })
    }

    fn interval_for_quiet(quiet_ms: i64) -> u64 {
        if quiet_ms < 5_000 {
            1_000
        } else if quiet_ms < 30_000 {
            2_000
        } else if quiet_ms < 300_000 {
            10_000
        } else if quiet_ms < 1_800_000 {
            30_000
        } else {
            300_000
        }
    }
}
