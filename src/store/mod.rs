//! Local store — one SQLite database per campaign.
//!
//! # Overview
//!
//! [`CampaignStore`] is the public surface. It layers change recording and
//! change notifications over the raw [`SqliteStore`]:
//!
//! - [`sqlite`] — typed tables, the change log, meta keys, transactions.
//! - [`migrate`] — versioned schema ladder run at open.
//! - [`remote`] — last-write-wins application of pulled changes.
//!
//! Local mutations go through [`CampaignStore::record`] /
//! [`CampaignStore::record_delete`], which write the entity row and its
//! change-log entry in one transaction and notify listeners after commit.
//! [`CampaignStore::put`] and [`CampaignStore::delete`] are persistence only:
//! no change is recorded, no event fires.

pub mod migrate;
pub mod remote;
pub mod sqlite;

pub use migrate::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use serde_json::json;

use crate::error::{LoreDbError, Result, StoreError};
use crate::reactive::{StoreEvent, StoreEvents, WriteSource};
use crate::types::{
    validate_campaign_slug, ApplyOutcome, Change, ChangeOp, ChatMessage, ChatSession, Entity,
    EntityKind, Folder, Note, NoteKind, Relationship, RemoteChange,
};

pub(crate) const META_PULL_CURSOR: &str = "sync:cursor";
pub(crate) const META_LAST_SYNCED: &str = "sync:lastSyncedAt";

/// Options for opening a [`CampaignStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Campaign this store is scoped to; `None` = the global store.
    pub campaign: Option<String>,
    /// Database file path; `None` opens an in-memory database.
    pub path: Option<String>,
}

/// The local database for one campaign.
#[derive(Debug)]
pub struct CampaignStore {
    campaign: Option<String>,
    db: SqliteStore,
    events: StoreEvents,
}

impl CampaignStore {
    /// Open (creating if needed) the database and run pending schema
    /// migrations.
    pub fn open(options: StoreOptions) -> Result<Self> {
        if let Some(campaign) = &options.campaign {
            validate_campaign_slug(campaign)?;
        }

        let db = match &options.path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        db.initialize()?;
        migrate::run(&db)?;

        Ok(Self {
            campaign: options.campaign,
            db,
            events: StoreEvents::new(),
        })
    }

    /// Campaign slug this store is scoped to (`None` = global).
    pub fn campaign(&self) -> Option<&str> {
        self.campaign.as_deref()
    }

    /// Change notifications. Subscribe here for committed writes.
    pub fn events(&self) -> &StoreEvents {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        self.db.get_note(id)
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<Relationship>> {
        self.db.get_edge(id)
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        self.db.get_folder(id)
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatSession>> {
        self.db.get_chat(id)
    }

    pub fn get_chat_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        self.db.get_chat_message(id)
    }

    pub fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        self.db.get_entity(kind, id)
    }

    pub fn all_notes(&self) -> Result<Vec<Note>> {
        self.db.all_notes()
    }

    pub fn notes_by_kind(&self, kind: NoteKind) -> Result<Vec<Note>> {
        self.db.notes_by_kind(kind)
    }

    pub fn note_count(&self) -> Result<usize> {
        self.db.note_count()
    }

    pub fn all_edges(&self) -> Result<Vec<Relationship>> {
        self.db.all_edges()
    }

    pub fn edges_from(&self, note_id: &str) -> Result<Vec<Relationship>> {
        self.db.edges_from(note_id)
    }

    pub fn edges_to(&self, note_id: &str) -> Result<Vec<Relationship>> {
        self.db.edges_to(note_id)
    }

    pub fn all_folders(&self) -> Result<Vec<Folder>> {
        self.db.all_folders()
    }

    pub fn child_folders(&self, parent_id: Option<&str>) -> Result<Vec<Folder>> {
        self.db.child_folders(parent_id)
    }

    pub fn all_chats(&self) -> Result<Vec<ChatSession>> {
        self.db.all_chats()
    }

    pub fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.db.messages_for_chat(chat_id)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.db.get_meta(key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_meta(key, value)
    }

    // -----------------------------------------------------------------------
    // Unlogged writes
    // -----------------------------------------------------------------------

    /// Write one entity without recording a change or notifying listeners.
    /// For locally-derived state that must not sync (e.g. embedding cache
    /// fields on notes).
    pub fn put(&self, entity: &Entity) -> Result<()> {
        self.db.put_entity(entity)
    }

    /// Remove one row without recording a change. Returns whether it existed.
    pub fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        self.db.delete_entity(kind, id)
    }

    // -----------------------------------------------------------------------
    // Recorded mutations
    // -----------------------------------------------------------------------

    /// Persist `entity` and append a change-log entry in one transaction.
    ///
    /// The mutation timestamp is clamped so the stored `updated_at` never
    /// decreases: `max(ts, existing updated_at)`. Returns the recorded change
    /// with its assigned id. Listeners are notified after commit.
    pub fn record(&self, op: ChangeOp, entity: &Entity, ts: i64) -> Result<Change> {
        if op == ChangeOp::Delete {
            return Err(LoreDbError::Internal(
                "record() does not take deletes; use record_delete()".to_string(),
            ));
        }

        let mut entity = entity.clone();
        let existing = self.db.entity_updated_at(entity.kind(), entity.id())?;
        let clamped = existing.map_or(ts, |prev| ts.max(prev));
        entity.raise_updated_at(clamped);

        let payload = entity
            .to_payload()
            .map_err(|e| LoreDbError::Internal(format!("serialize payload: {e}")))?;
        let mut change = Change {
            id: 0,
            op,
            entity: entity.kind(),
            entity_id: entity.id().to_string(),
            payload,
            ts: clamped,
        };

        let id = self.db.transaction(|db| {
            db.put_entity(&entity)?;
            db.append_change(&change)
        })?;
        change.id = id;

        self.emit_event(StoreEvent {
            table: entity.kind(),
            ids: vec![entity.id().to_string()],
            source: WriteSource::Local,
        });
        Ok(change)
    }

    /// Remove the entity row and append a delete change in one transaction.
    ///
    /// The change is recorded even when no local row exists, so a delete made
    /// on this client still reaches the backend. The delete timestamp is
    /// clamped the same way as [`CampaignStore::record`].
    pub fn record_delete(&self, kind: EntityKind, id: &str, ts: i64) -> Result<Change> {
        let existing = self.db.entity_updated_at(kind, id)?;
        let clamped = existing.map_or(ts, |prev| ts.max(prev));

        let mut change = Change {
            id: 0,
            op: ChangeOp::Delete,
            entity: kind,
            entity_id: id.to_string(),
            payload: json!({ "id": id }),
            ts: clamped,
        };

        let change_id = self.db.transaction(|db| {
            db.delete_entity(kind, id)?;
            db.append_change(&change)
        })?;
        change.id = change_id;

        self.emit_event(StoreEvent {
            table: kind,
            ids: vec![id.to_string()],
            source: WriteSource::Local,
        });
        Ok(change)
    }

    // -----------------------------------------------------------------------
    // Sync surface
    // -----------------------------------------------------------------------

    /// All unpushed changes, oldest first.
    pub fn pending_changes(&self) -> Result<Vec<Change>> {
        self.db.pending_changes()
    }

    pub fn pending_change_count(&self) -> Result<usize> {
        self.db.pending_change_count()
    }

    /// Drop exactly the given change ids (acked by the backend).
    pub fn prune_changes(&self, ids: &[i64]) -> Result<usize> {
        self.db.prune_changes(ids)
    }

    /// Apply one pulled batch under last-write-wins. The batch commits as a
    /// unit; listeners are notified per table after commit.
    pub fn apply_remote_changes(&self, changes: &[RemoteChange]) -> Result<ApplyOutcome> {
        let (outcome, touched) = remote::apply_batch(&self.db, changes)?;

        let mut grouped: Vec<(EntityKind, Vec<String>)> = Vec::new();
        for (kind, id) in touched {
            match grouped.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, ids)) => ids.push(id),
                None => grouped.push((kind, vec![id])),
            }
        }
        for (table, ids) in grouped {
            self.emit_event(StoreEvent {
                table,
                ids,
                source: WriteSource::Remote,
            });
        }

        Ok(outcome)
    }

    /// Load starter notes into an empty store.
    ///
    /// The emptiness check runs inside the same transaction as the writes, so
    /// a concurrent pull cannot interleave between check and load. Returns
    /// how many notes were written (0 when the store was not empty).
    pub fn seed_notes(&self, notes: &[Note]) -> Result<usize> {
        let seeded_ids = self.db.transaction(|db| {
            if db.note_count()? > 0 {
                return Ok(Vec::new());
            }
            let mut ids = Vec::with_capacity(notes.len());
            for note in notes {
                let mut note = note.clone();
                note.backfill_campaign_ids();
                ids.push(note.id.clone());
                db.put_entity(&Entity::Node(note))?;
            }
            Ok(ids)
        })?;

        let count = seeded_ids.len();
        if count > 0 {
            self.emit_event(StoreEvent {
                table: EntityKind::Node,
                ids: seeded_ids,
                source: WriteSource::Seed,
            });
        }
        Ok(count)
    }

    /// Pull cursor: the `ts` up to which remote changes have been applied.
    pub fn pull_cursor(&self) -> Result<i64> {
        Ok(self.meta_i64(META_PULL_CURSOR)?.unwrap_or(0))
    }

    pub fn set_pull_cursor(&self, cursor: i64) -> Result<()> {
        self.db.set_meta(META_PULL_CURSOR, &cursor.to_string())
    }

    /// Wall-clock time of the last fully clean sync tick, if any.
    pub fn last_synced_at(&self) -> Result<Option<i64>> {
        self.meta_i64(META_LAST_SYNCED)
    }

    pub fn set_last_synced_at(&self, ts: i64) -> Result<()> {
        self.db.set_meta(META_LAST_SYNCED, &ts.to_string())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn meta_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.db.get_meta(key)? {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|e| {
                LoreDbError::Storage(StoreError::Corruption {
                    table: "meta".to_string(),
                    id: key.to_string(),
                    source: Box::new(e),
                })
            }),
        }
    }

    /// Emit a change event to all listeners.
    ///
    /// Panics from listeners are caught so that a misbehaving callback can
    /// never unwind into a caller that just committed a write.
    fn emit_event(&self, event: StoreEvent) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.events.emit(&event);
        }));
    }
}
