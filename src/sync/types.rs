//! Sync-specific types: transport trait, store trait, and data structures
//! for push/pull synchronization.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Result,
    store::CampaignStore,
    types::{ApplyOutcome, Change, ChangeOp, EntityKind, Note, RemoteChange},
};

// ============================================================================
// SyncTransport — network layer
// ============================================================================

/// Transport for push/pull synchronization.
///
/// Implementations handle the actual network communication with the sync
/// backend; [`HttpTransport`](crate::sync::HttpTransport) is the stock one.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Upload a batch of local changes. Returns the local change ids the
    /// backend durably accepted; unacked changes stay pending for the next
    /// push.
    async fn push_changes(
        &self,
        campaign: Option<&str>,
        changes: &[ChangeUpload],
    ) -> std::result::Result<PushOutcome, SyncTransportError>;

    /// Fetch remote changes with `ts` strictly greater than `since`.
    async fn pull_changes(
        &self,
        campaign: Option<&str>,
        since: i64,
    ) -> std::result::Result<PullBatch, SyncTransportError>;

    /// Fetch the starter snapshot used to seed an empty store. Each element
    /// is one note as raw JSON.
    async fn fetch_snapshot(
        &self,
        campaign: Option<&str>,
    ) -> std::result::Result<Vec<Value>, SyncTransportError>;
}

/// Transport-level error (wraps arbitrary error strings from the transport layer).
#[derive(Debug, Clone)]
pub struct SyncTransportError {
    pub message: String,
    pub kind: SyncErrorKind,
}

impl SyncTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: SyncErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: SyncErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for SyncTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyncTransportError {}

// ============================================================================
// SyncStore — storage interface for sync operations
// ============================================================================

/// Narrow storage interface covering only the methods the sync engine needs.
/// Enables trait-object usage via `Arc<dyn SyncStore>` and mock stores in
/// tests.
///
/// # Threading
/// All methods are synchronous (the SQLite store underneath is synchronous).
/// Callers in async contexts should be aware these calls block the current
/// thread.
pub trait SyncStore: Send + Sync {
    /// Campaign slug this store is scoped to (`None` = global).
    fn campaign(&self) -> Option<&str>;
    fn pending_changes(&self) -> Result<Vec<Change>>;
    fn prune_changes(&self, ids: &[i64]) -> Result<usize>;
    fn apply_remote_changes(&self, changes: &[RemoteChange]) -> Result<ApplyOutcome>;
    fn pull_cursor(&self) -> Result<i64>;
    fn set_pull_cursor(&self, cursor: i64) -> Result<()>;
    fn set_last_synced_at(&self, ts: i64) -> Result<()>;
    fn note_count(&self) -> Result<usize>;
    fn seed_notes(&self, notes: &[Note]) -> Result<usize>;
}

impl SyncStore for CampaignStore {
    fn campaign(&self) -> Option<&str> {
        CampaignStore::campaign(self)
    }

    fn pending_changes(&self) -> Result<Vec<Change>> {
        CampaignStore::pending_changes(self)
    }

    fn prune_changes(&self, ids: &[i64]) -> Result<usize> {
        CampaignStore::prune_changes(self, ids)
    }

    fn apply_remote_changes(&self, changes: &[RemoteChange]) -> Result<ApplyOutcome> {
        CampaignStore::apply_remote_changes(self, changes)
    }

    fn pull_cursor(&self) -> Result<i64> {
        CampaignStore::pull_cursor(self)
    }

    fn set_pull_cursor(&self, cursor: i64) -> Result<()> {
        CampaignStore::set_pull_cursor(self, cursor)
    }

    fn set_last_synced_at(&self, ts: i64) -> Result<()> {
        CampaignStore::set_last_synced_at(self, ts)
    }

    fn note_count(&self) -> Result<usize> {
        CampaignStore::note_count(self)
    }

    fn seed_notes(&self, notes: &[Note]) -> Result<usize> {
        CampaignStore::seed_notes(self, notes)
    }
}

// ============================================================================
// Outbound / Inbound Types
// ============================================================================

/// One change as uploaded to the backend. Carries the local change-log id so
/// the backend can ack exactly what it persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeUpload {
    pub id: i64,
    pub op: ChangeOp,
    pub entity: EntityKind,
    pub entity_id: String,
    pub payload: Value,
    pub ts: i64,
}

impl From<&Change> for ChangeUpload {
    fn from(change: &Change) -> Self {
        Self {
            id: change.id,
            op: change.op,
            entity: change.entity,
            entity_id: change.entity_id.clone(),
            payload: change.payload.clone(),
            ts: change.ts,
        }
    }
}

/// Backend acknowledgement for a pushed batch.
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Local change ids the backend durably accepted.
    pub acked: Vec<i64>,
}

/// Result of a transport pull operation.
#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    pub changes: Vec<RemoteChange>,
    /// Cursor for the next pull. Falls back to `max(changes.ts)` if `None`.
    pub cursor: Option<i64>,
}

// ============================================================================
// Sync Result Types
// ============================================================================

/// Aggregated result of a sync cycle (push, pull, or both).
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Changes the backend acked and the store pruned.
    pub pushed: usize,
    /// Remote changes applied locally.
    pub pulled: usize,
    /// Remote changes skipped because local state was newer.
    pub skipped: usize,
    pub errors: Vec<SyncErrorEvent>,
}

impl SyncResult {
    pub fn merge(&mut self, other: SyncResult) {
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

/// Classification of sync errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Retriable (network, temporary failures)
    Transient,
    /// Not retriable (validation, malformed payloads, etc.)
    Permanent,
    /// Authentication failed
    Auth,
    /// Rate limit or quota exceeded
    Capacity,
}

/// A sync error event — collected in `SyncResult.errors`, never thrown.
#[derive(Debug, Clone)]
pub struct SyncErrorEvent {
    pub phase: SyncPhase,
    /// Campaign slug; `None` = global.
    pub campaign: Option<String>,
    /// Entity id for record-level failures, `None` for phase-level ones.
    pub entity_id: Option<String>,
    pub error: String,
    pub kind: SyncErrorKind,
}

/// Which phase of sync an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Push,
    Pull,
}

// ============================================================================
// SyncEngine Options
// ============================================================================

/// Callback type for sync error events.
pub type SyncErrorCallback = dyn Fn(&SyncErrorEvent) + Send + Sync;

/// Configuration for `SyncEngine`.
pub struct SyncEngineOptions {
    pub transport: Arc<dyn SyncTransport>,
    pub store: Arc<dyn SyncStore>,
    /// Push batch size (`None` = default 50)
    pub push_batch_size: Option<usize>,
    /// Called for each sync error
    pub on_error: Option<Arc<SyncErrorCallback>>,
}
