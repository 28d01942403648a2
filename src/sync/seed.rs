//! SeedLoader — first-run bootstrap from the backend snapshot.
//!
//! A fresh client starts with an empty store. Rather than replaying the
//! campaign's entire change history, the loader fetches the backend's bulk
//! snapshot once and inserts it directly, without change-log entries:
//! seeded state is backend truth, not a local mutation to push back.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::types::Note;

use super::types::{SyncStore, SyncTransport};

/// Outcome of a seed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Store was empty; this many notes were inserted.
    Seeded(usize),
    /// Store already had notes; nothing was written.
    Skipped,
}

pub struct SeedLoader {
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn SyncStore>,
}

impl SeedLoader {
    pub fn new(transport: Arc<dyn SyncTransport>, store: Arc<dyn SyncStore>) -> Self {
        Self { transport, store }
    }

    /// Seed the store from the backend snapshot if it holds no notes.
    ///
    /// The emptiness gate is observed state, not a persisted flag: clearing
    /// the store makes the next call seed again. The gate is re-checked
    /// inside the insert transaction, so a local write racing this call
    /// wins and the seed reports `Skipped`.
    ///
    /// Snapshot records that fail to parse are skipped individually; the
    /// rest are still inserted.
    pub async fn seed_if_empty(&self) -> Result<SeedOutcome> {
        if self.store.note_count()? > 0 {
            return Ok(SeedOutcome::Skipped);
        }

        let raw = self
            .transport
            .fetch_snapshot(self.store.campaign())
            .await
            .map_err(|e| SyncError::Transport(e.message))?;

        let mut notes: Vec<Note> = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<Note>(value) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    warn!(error = %e, "skipping malformed snapshot record");
                }
            }
        }

        let inserted = self.store.seed_notes(&notes)?;
        if inserted == 0 && !notes.is_empty() {
            // Lost the race to a concurrent local write.
            return Ok(SeedOutcome::Skipped);
        }

        debug!(count = inserted, "seeded store from snapshot");
        Ok(SeedOutcome::Seeded(inserted))
    }
}
