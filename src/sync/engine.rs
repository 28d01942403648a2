//! SyncEngine — core push/pull sync orchestration for one store.
//!
//! All public methods are async. Errors are collected in
//! `SyncResult.errors` — public methods never return `Err`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

use crate::types::now_ms;

use super::types::*;

/// Default number of changes per push request.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 50;

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn SyncStore>,
    push_batch_size: Option<usize>,
    on_error: Option<Arc<SyncErrorCallback>>,
    /// Serializes concurrent sync calls on this engine.
    lock: TokioMutex<()>,
}

impl SyncEngine {
    pub fn new(options: SyncEngineOptions) -> Self {
        Self {
            transport: options.transport,
            store: options.store,
            push_batch_size: options.push_batch_size,
            on_error: options.on_error,
            lock: TokioMutex::new(()),
        }
    }

    /// Campaign slug this engine syncs (`None` = global).
    pub fn campaign(&self) -> Option<&str> {
        self.store.campaign()
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Full push+pull tick.
    ///
    /// Local changes go out first so the backend reconciles them before we
    /// ingest its state; the pull phase runs regardless of how the push
    /// fared. After a tick with no errors the store's last-synced timestamp
    /// is updated.
    pub async fn sync(&self) -> SyncResult {
        self.with_lock(async {
            let mut result = self.push_impl().await;
            result.merge(self.pull_impl().await);

            if result.errors.is_empty() {
                if let Err(e) = self.store.set_last_synced_at(now_ms()) {
                    result.errors.push(self.make_sync_error(
                        SyncPhase::Pull,
                        None,
                        &e.to_string(),
                        SyncErrorKind::Transient,
                    ));
                }
            }
            result
        })
        .await
    }

    /// Push only (under the engine lock).
    pub async fn push(&self) -> SyncResult {
        self.with_lock(async { self.push_impl().await }).await
    }

    /// Pull only (under the engine lock).
    pub async fn pull(&self) -> SyncResult {
        self.with_lock(async { self.pull_impl().await }).await
    }

    // -----------------------------------------------------------------------
    // Push Implementation
    // -----------------------------------------------------------------------

    async fn push_impl(&self) -> SyncResult {
        let mut result = SyncResult::default();

        let batch_size = self.push_batch_size.unwrap_or(DEFAULT_PUSH_BATCH_SIZE);
        if batch_size == 0 {
            result.errors.push(self.make_sync_error(
                SyncPhase::Push,
                None,
                "pushBatchSize must be a positive number",
                SyncErrorKind::Permanent,
            ));
            return result;
        }

        // Snapshot the pending log; changes recorded after this point belong
        // to the next tick.
        let pending = match self.store.pending_changes() {
            Ok(pending) => pending,
            Err(e) => {
                result.errors.push(self.make_sync_error(
                    SyncPhase::Push,
                    None,
                    &e.to_string(),
                    SyncErrorKind::Transient,
                ));
                return result;
            }
        };

        if pending.is_empty() {
            return result;
        }

        let outbound: Vec<ChangeUpload> = pending.iter().map(ChangeUpload::from).collect();
        let total = outbound.len();

        let mut pushed = 0;
        for chunk_start in (0..total).step_by(batch_size) {
            let chunk_end = (chunk_start + batch_size).min(total);
            let batch = &outbound[chunk_start..chunk_end];

            let outcome = match self.transport.push_changes(self.store.campaign(), batch).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    result.errors.push(self.make_sync_error(
                        SyncPhase::Push,
                        None,
                        &e.message,
                        e.kind,
                    ));
                    // Stop sending further batches but keep partial progress
                    break;
                }
            };

            // Prune exactly what the backend acked from this batch. Unacked
            // changes stay in the log and retry next tick.
            let batch_ids: HashSet<i64> = batch.iter().map(|c| c.id).collect();
            let acked: Vec<i64> = outcome
                .acked
                .iter()
                .copied()
                .filter(|id| batch_ids.contains(id))
                .collect();

            match self.store.prune_changes(&acked) {
                Ok(n) => pushed += n,
                Err(e) => {
                    result.errors.push(self.make_sync_error(
                        SyncPhase::Push,
                        None,
                        &e.to_string(),
                        SyncErrorKind::Transient,
                    ));
                    break;
                }
            }
        }

        result.pushed = pushed;
        result
    }

    // -----------------------------------------------------------------------
    // Pull Implementation
    // -----------------------------------------------------------------------

    async fn pull_impl(&self) -> SyncResult {
        let mut result = SyncResult::default();

        let since = match self.store.pull_cursor() {
            Ok(cursor) => cursor,
            Err(e) => {
                result.errors.push(self.make_sync_error(
                    SyncPhase::Pull,
                    None,
                    &e.to_string(),
                    SyncErrorKind::Transient,
                ));
                return result;
            }
        };

        let batch = match self.transport.pull_changes(self.store.campaign(), since).await {
            Ok(batch) => batch,
            Err(e) => {
                result.errors.push(self.make_sync_error(
                    SyncPhase::Pull,
                    None,
                    &e.message,
                    e.kind,
                ));
                // Don't advance cursor on transport failure
                return result;
            }
        };

        if !batch.changes.is_empty() {
            match self.store.apply_remote_changes(&batch.changes) {
                Ok(outcome) => {
                    result.pulled = outcome.applied;
                    result.skipped = outcome.skipped;

                    // Malformed changes are dropped rather than blocking the
                    // cursor: retrying them would fail identically forever.
                    for bad in &outcome.malformed {
                        warn!(
                            entity = %bad.entity,
                            entity_id = %bad.entity_id,
                            error = %bad.error,
                            "skipping malformed remote change"
                        );
                        result.errors.push(self.make_sync_error(
                            SyncPhase::Pull,
                            Some(&bad.entity_id),
                            &bad.error,
                            SyncErrorKind::Permanent,
                        ));
                    }
                }
                Err(e) => {
                    result.errors.push(self.make_sync_error(
                        SyncPhase::Pull,
                        None,
                        &e.to_string(),
                        SyncErrorKind::Transient,
                    ));
                    // Don't advance cursor when the batch rolled back
                    return result;
                }
            }
        }

        // Advance cursor (forward only)
        let latest = batch
            .cursor
            .unwrap_or_else(|| batch.changes.iter().map(|c| c.ts).max().unwrap_or(0));

        if latest > since {
            if let Err(e) = self.store.set_pull_cursor(latest) {
                result.errors.push(self.make_sync_error(
                    SyncPhase::Pull,
                    None,
                    &e.to_string(),
                    SyncErrorKind::Transient,
                ));
            }
        }

        result
    }

    // -----------------------------------------------------------------------
    // Lock Management
    // -----------------------------------------------------------------------

    async fn with_lock<F: std::future::Future<Output = SyncResult>>(&self, f: F) -> SyncResult {
        let _guard = self.lock.lock().await;
        f.await
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    fn make_sync_error(
        &self,
        phase: SyncPhase,
        entity_id: Option<&str>,
        error: &str,
        kind: SyncErrorKind,
    ) -> SyncErrorEvent {
        let event = SyncErrorEvent {
            phase,
            campaign: self.store.campaign().map(|s| s.to_string()),
            entity_id: entity_id.map(|s| s.to_string()),
            error: error.to_string(),
            kind,
        };
        if let Some(ref on_error) = self.on_error {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_error(&event);
            }));
        }
        event
    }
}
