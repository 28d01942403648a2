//! SyncScheduler — background cadence and coalescing layer over `SyncEngine`.
//!
//! One process-wide instance schedules every campaign. Each campaign gets a
//! single timer loop regardless of how many surfaces subscribe to it;
//! subscriptions are reference-counted `SyncHandle` guards and the loop
//! stops when the last one drops. Explicit triggers (`sync_now`) coalesce:
//! callers arriving while a cycle runs or cools down all share the result
//! of the next cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::error::SyncError;
use crate::types::campaign_slug;

use super::activity::ActivityTracker;
use super::engine::SyncEngine;
use super::types::SyncResult;

/// Default timer interval between background sync cycles.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 5000;
/// Default cooldown between consecutive cycles for one campaign.
pub const DEFAULT_THROTTLE_MS: u64 = 1000;
/// Default quiet gap required before an adaptive tick fires.
pub const DEFAULT_MIN_QUIET_MS: u64 = 1000;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Default)]
pub struct SyncSchedulerOptions {
    /// Timer interval for `SyncCadence::Fixed` subscribers (default: 5000).
    pub interval_ms: Option<u64>,
    /// Cooldown between sync cycles for one campaign (default: 1000).
    pub throttle_ms: Option<u64>,
    /// Minimum time since the last local edit before an adaptive tick
    /// fires (default: 1000). Keeps sync off the hot path of typing.
    pub min_quiet_ms: Option<u64>,
}

/// How a subscriber wants its campaign's timer loop paced.
#[derive(Debug, Clone)]
pub enum SyncCadence {
    /// Sync every `n` milliseconds.
    Fixed(u64),
    /// Recompute the interval each pass from recent local-edit activity:
    /// short intervals while the user edits, long ones when idle.
    Adaptive(Arc<ActivityTracker>),
}

// ============================================================================
// SyncScheduler
// ============================================================================

pub struct SyncScheduler {
    interval_ms: u64,
    throttle_ms: u64,
    min_quiet_ms: u64,
    slots: Arc<Mutex<HashMap<String, CampaignSlot>>>,
    disposed: Arc<AtomicBool>,
}

/// Per-campaign scheduling state. The slot exists while at least one
/// `SyncHandle` for the campaign is alive.
struct CampaignSlot {
    engine: Arc<SyncEngine>,
    state: Arc<Mutex<SlotState>>,
    stop: Arc<Notify>,
    subscribers: usize,
}

struct SlotState {
    running: bool,
    cooldown_active: bool,
    /// Queued waiters — they all share the next cycle's result.
    queued_senders: Vec<oneshot::Sender<Result<SyncResult, SyncError>>>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            running: false,
            cooldown_active: false,
            queued_senders: Vec::new(),
        }
    }
}

/// What the caller should do after checking the slot state.
enum ScheduleAction {
    /// Slot is idle — caller should run a cycle now.
    Run,
    /// Slot is busy — caller should await on this receiver.
    Wait(oneshot::Receiver<Result<SyncResult, SyncError>>),
}

impl SyncScheduler {
    pub fn new(options: SyncSchedulerOptions) -> Self {
        Self {
            interval_ms: options.interval_ms.unwrap_or(DEFAULT_SYNC_INTERVAL_MS),
            throttle_ms: options.throttle_ms.unwrap_or(DEFAULT_THROTTLE_MS),
            min_quiet_ms: options.min_quiet_ms.unwrap_or(DEFAULT_MIN_QUIET_MS),
            slots: Arc::new(Mutex::new(HashMap::new())),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a subscriber for the engine's campaign and return the guard
    /// that keeps its background loop alive.
    ///
    /// The first subscriber for a campaign starts the timer loop with the
    /// given cadence (`None` = fixed at the scheduler's `interval_ms`);
    /// later subscribers share that loop, and their `cadence` argument is
    /// ignored. Dropping the last handle stops the loop — an in-flight
    /// cycle completes, the stop is observed between ticks.
    ///
    /// Must be called from a Tokio runtime context.
    pub fn subscribe(
        &self,
        engine: Arc<SyncEngine>,
        cadence: Option<SyncCadence>,
    ) -> Result<SyncHandle, SyncError> {
        self.check_disposed()?;
        let key = campaign_slug(engine.campaign()).to_string();

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            slot.subscribers += 1;
            return Ok(SyncHandle {
                slots: self.slots.clone(),
                key,
            });
        }

        // First subscriber — create the slot and start the loop.
        let state = Arc::new(Mutex::new(SlotState::new()));
        let stop = Arc::new(Notify::new());
        slots.insert(
            key.clone(),
            CampaignSlot {
                engine: engine.clone(),
                state: state.clone(),
                stop: stop.clone(),
                subscribers: 1,
            },
        );

        let cadence = cadence.unwrap_or(SyncCadence::Fixed(self.interval_ms));
        let throttle_ms = self.throttle_ms;
        let min_quiet_ms = self.min_quiet_ms;
        let disposed = self.disposed.clone();

        tokio::spawn(async move {
            loop {
                let interval = match &cadence {
                    SyncCadence::Fixed(ms) => *ms,
                    SyncCadence::Adaptive(tracker) => tracker.current_interval_ms(),
                };

                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(tokio::time::Duration::from_millis(interval)) => {}
                }

                if disposed.load(Ordering::SeqCst) {
                    break;
                }

                // Don't sync mid-edit; the next pass will land in a quiet gap.
                if let SyncCadence::Adaptive(tracker) = &cadence {
                    if tracker.millis_since_activity() < min_quiet_ms as i64 {
                        continue;
                    }
                }

                Self::try_tick(
                    state.clone(),
                    engine.clone(),
                    throttle_ms,
                    disposed.clone(),
                )
                .await;
            }
        });

        Ok(SyncHandle {
            slots: self.slots.clone(),
            key,
        })
    }

    /// Explicitly trigger a sync cycle for a campaign (`None` = global).
    ///
    /// If the campaign's slot is idle the cycle runs immediately. If a cycle
    /// is running or cooling down, the caller is queued and receives the
    /// shared result of the follow-up cycle that runs after the cooldown.
    pub async fn sync_now(&self, campaign: Option<&str>) -> Result<SyncResult, SyncError> {
        self.check_disposed()?;
        let key = campaign_slug(campaign).to_string();

        let (engine, state) = {
            let slots = self.slots.lock();
            match slots.get(&key) {
                Some(slot) => (slot.engine.clone(), slot.state.clone()),
                None => return Err(SyncError::UnknownCampaign(key)),
            }
        };

        let action = {
            let mut slot = state.lock();
            if slot.running || slot.cooldown_active {
                let (tx, rx) = oneshot::channel();
                slot.queued_senders.push(tx);
                ScheduleAction::Wait(rx)
            } else {
                slot.running = true;
                ScheduleAction::Run
            }
        };

        match action {
            ScheduleAction::Wait(rx) => rx.await.map_err(|_| SyncError::Disposed)?,
            ScheduleAction::Run => Ok(Self::run_cycle(
                state,
                engine,
                self.throttle_ms,
                self.disposed.clone(),
            )
            .await),
        }
    }

    /// Dispose the scheduler — stop every campaign loop and reject queued
    /// waiters with `SyncError::Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);

        let mut slots = self.slots.lock();
        for (_, slot) in slots.drain() {
            slot.stop.notify_one();
            let mut state = slot.state.lock();
            for sender in state.queued_senders.drain(..) {
                let _ = sender.send(Err(SyncError::Disposed));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn check_disposed(&self) -> Result<(), SyncError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Timer-tick entry: run a cycle unless one is already running or in
    /// cooldown, in which case the tick is skipped entirely.
    async fn try_tick(
        state: Arc<Mutex<SlotState>>,
        engine: Arc<SyncEngine>,
        throttle_ms: u64,
        disposed: Arc<AtomicBool>,
    ) {
        let should_run = {
            let mut slot = state.lock();
            if slot.running || slot.cooldown_active {
                false
            } else {
                slot.running = true;
                true
            }
        };

        if should_run {
            let _ = Self::run_cycle(state, engine, throttle_ms, disposed).await;
        }
    }

    /// Run one sync cycle. Caller must have marked the slot `running`.
    ///
    /// After the cycle, the slot enters cooldown and a background task
    /// serves any queued waiters: once the throttle window elapses it runs
    /// a follow-up cycle and sends its result to all of them, repeating if
    /// yet more waiters arrive mid-cycle.
    async fn run_cycle(
        state: Arc<Mutex<SlotState>>,
        engine: Arc<SyncEngine>,
        throttle_ms: u64,
        disposed: Arc<AtomicBool>,
    ) -> SyncResult {
        let result = engine.sync().await;

        // Collect waiters that queued during the run; they are served by the
        // follow-up cycle, not handed this one's result.
        let queued = {
            let mut slot = state.lock();
            slot.running = false;
            slot.cooldown_active = true;
            slot.queued_senders.drain(..).collect::<Vec<_>>()
        };

        let state_clone = state.clone();
        tokio::spawn(async move {
            let mut prev_senders = queued;

            loop {
                tokio::time::sleep(tokio::time::Duration::from_millis(throttle_ms)).await;

                // Collect senders that arrived during cooldown
                let cooldown_senders = {
                    let mut slot = state_clone.lock();
                    slot.cooldown_active = false;
                    slot.queued_senders.drain(..).collect::<Vec<_>>()
                };

                let mut all_senders = std::mem::take(&mut prev_senders);
                all_senders.extend(cooldown_senders);

                if all_senders.is_empty() {
                    break;
                }

                if disposed.load(Ordering::SeqCst) {
                    for sender in all_senders {
                        let _ = sender.send(Err(SyncError::Disposed));
                    }
                    break;
                }

                // Run the follow-up cycle
                {
                    let mut slot = state_clone.lock();
                    slot.running = true;
                }

                let follow_result = engine.sync().await;

                let during_run_senders = {
                    let mut slot = state_clone.lock();
                    slot.running = false;
                    slot.cooldown_active = true;
                    slot.queued_senders.drain(..).collect::<Vec<_>>()
                };

                for sender in all_senders {
                    let _ = sender.send(Ok(follow_result.clone()));
                }

                // If new waiters arrived during the follow-up, loop for
                // another cooldown cycle
                if during_run_senders.is_empty() {
                    let mut slot = state_clone.lock();
                    slot.cooldown_active = false;
                    break;
                }
                prev_senders = during_run_senders;
            }
        });

        result
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("interval_ms", &self.interval_ms)
            .field("throttle_ms", &self.throttle_ms)
            .field("campaigns", &self.slots.lock().len())
            .finish()
    }
}

// ============================================================================
// SyncHandle
// ============================================================================

/// Guard for one subscription to a campaign's background sync loop.
///
/// Dropping the handle decrements the campaign's subscriber count; dropping
/// the last one stops the loop.
pub struct SyncHandle {
    slots: Arc<Mutex<HashMap<String, CampaignSlot>>>,
    key: String,
}

impl SyncHandle {
    /// Campaign slug this handle keeps alive.
    pub fn campaign(&self) -> &str {
        &self.key
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.subscribers -= 1;
            if slot.subscribers == 0 {
                if let Some(slot) = slots.remove(&self.key) {
                    slot.stop.notify_one();
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle").field("campaign", &self.key).finish()
    }
}
