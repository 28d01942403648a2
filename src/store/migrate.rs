//! Versioned schema migrations, applied at store open.
//!
//! `meta['schema:version']` tracks the last completed step. Each step runs in
//! its own transaction, so a failure leaves the database at the previous
//! version instead of half-migrated.

use tracing::debug;

use crate::error::{LoreDbError, MigrationError, Result, StoreError};
use crate::types::Entity;

use super::sqlite::SqliteStore;

/// Schema version written by the current build.
pub const SCHEMA_VERSION: u32 = 2;

const VERSION_KEY: &str = "schema:version";

/// v1 — entity tables and the change log.
const V1_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);
CREATE INDEX IF NOT EXISTS idx_nodes_updated_at ON nodes(updated_at);

CREATE TABLE IF NOT EXISTS edges (
    id         TEXT PRIMARY KEY,
    from_id    TEXT NOT NULL,
    to_id      TEXT NOT NULL,
    kind       TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);

CREATE TABLE IF NOT EXISTS folders (
    id         TEXT PRIMARY KEY,
    parent_id  TEXT,
    position   REAL NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);

CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id         TEXT PRIMARY KEY,
    chat_id    TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_chat
    ON chat_messages(chat_id, created_at);

CREATE TABLE IF NOT EXISTS changes (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    op        TEXT NOT NULL,
    entity    TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload   TEXT NOT NULL DEFAULT '{}',
    ts        INTEGER NOT NULL
);
";

/// Bring `store` up to [`SCHEMA_VERSION`]. Idempotent — a database already at
/// the current version is untouched.
pub fn run(store: &SqliteStore) -> Result<()> {
    let start = current_version(store)?;
    if start >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (start + 1)..=SCHEMA_VERSION {
        store
            .transaction(|s| {
                apply_step(s, version)?;
                s.set_meta(VERSION_KEY, &version.to_string())
            })
            .map_err(|e| MigrationError {
                from_version: start,
                to_version: SCHEMA_VERSION,
                failed_at: version,
                source: Box::new(e),
            })?;
        debug!(version, "schema migration step applied");
    }
    Ok(())
}

/// Read the recorded schema version (0 for a fresh database).
pub fn current_version(store: &SqliteStore) -> Result<u32> {
    match store.get_meta(VERSION_KEY)? {
        None => Ok(0),
        Some(raw) => raw.parse::<u32>().map_err(|e| {
            LoreDbError::Storage(StoreError::Corruption {
                table: "meta".to_string(),
                id: VERSION_KEY.to_string(),
                source: Box::new(e),
            })
        }),
    }
}

fn apply_step(store: &SqliteStore, version: u32) -> Result<()> {
    match version {
        1 => store.execute_batch(V1_SCHEMA),
        2 => backfill_campaign_ids(store),
        other => Err(LoreDbError::Internal(format!(
            "unknown schema migration step v{other}"
        ))),
    }
}

/// v2 — rows written before multi-campaign support carry only `campaignId`.
/// Rewrite every node and edge lacking a non-empty `campaignIds` so it holds
/// `[campaignId]` (or `[]` for global records).
fn backfill_campaign_ids(store: &SqliteStore) -> Result<()> {
    let mut rewritten = 0usize;

    for mut note in store.all_notes()? {
        if note.campaign_ids.is_empty() {
            note.backfill_campaign_ids();
            store.put_entity(&Entity::Node(note))?;
            rewritten += 1;
        }
    }

    for mut edge in store.all_edges()? {
        if edge.campaign_ids.is_empty() {
            edge.backfill_campaign_ids();
            store.put_entity(&Entity::Edge(edge))?;
            rewritten += 1;
        }
    }

    debug!(rewritten, "campaignIds backfill complete");
    Ok(())
}
