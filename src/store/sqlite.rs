//! SQLite persistence for a single campaign store.
//!
//! Each entity table (`nodes`, `edges`, `folders`, `chats`, `chat_messages`)
//! keeps a few hot columns for filtering plus the full record JSON in `data`;
//! the append-only `changes` table backs sync. The connection is protected by
//! a `parking_lot::ReentrantMutex<RefCell<Connection>>` so that
//! `transaction()` can hold the lock while calling the closure, which also
//! needs to lock in order to execute SQL.

use std::cell::{Cell, RefCell};

use parking_lot::ReentrantMutex;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{LoreDbError, Result, StoreError};
use crate::types::{
    Change, ChatMessage, ChatSession, Entity, EntityKind, Folder, Note, NoteKind, Relationship,
};

// ============================================================================
// Helpers
// ============================================================================

/// Map a rusqlite error to a `LoreDbError`.
fn storage_err(e: rusqlite::Error) -> LoreDbError {
    LoreDbError::Storage(StoreError::Sqlite(e))
}

/// Parse the `data` column (position 0) of a row into a record type.
fn row_data<T: DeserializeOwned>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    let data: String = row.get(0)?;
    serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::InvalidParameterName(format!("data: {e}")))
}

/// Parse a full row of the `changes` table.
fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<Change> {
    let id: i64 = row.get(0)?;
    let op_s: String = row.get(1)?;
    let entity_s: String = row.get(2)?;
    let entity_id: String = row.get(3)?;
    let payload_s: String = row.get(4)?;
    let ts: i64 = row.get(5)?;

    let op = serde_json::from_value(Value::String(op_s))
        .map_err(|e| rusqlite::Error::InvalidParameterName(format!("op: {e}")))?;
    let entity = serde_json::from_value(Value::String(entity_s))
        .map_err(|e| rusqlite::Error::InvalidParameterName(format!("entity: {e}")))?;
    let payload = serde_json::from_str(&payload_s)
        .map_err(|e| rusqlite::Error::InvalidParameterName(format!("payload: {e}")))?;

    Ok(Change {
        id,
        op,
        entity,
        entity_id,
        payload,
        ts,
    })
}

/// Serialize an entity to the JSON stored in its `data` column.
fn entity_data_json(entity: &Entity) -> Result<String> {
    let json = match entity {
        Entity::Node(n) => serde_json::to_string(n),
        Entity::Edge(e) => serde_json::to_string(e),
        Entity::Folder(f) => serde_json::to_string(f),
        Entity::Chat(c) => serde_json::to_string(c),
        Entity::ChatMessage(m) => serde_json::to_string(m),
    };
    json.map_err(|e| LoreDbError::Internal(format!("serialize data: {e}")))
}

// ============================================================================
// SqliteStore
// ============================================================================

/// SQLite backend for one campaign database.
///
/// `ReentrantMutex` allows `transaction()` to hold the guard while the closure
/// re-acquires it for individual SQL operations.
#[derive(Debug)]
pub struct SqliteStore {
    conn: ReentrantMutex<RefCell<rusqlite::Connection>>,
}

impl SqliteStore {
    /// Open a file-backed SQLite database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    /// Set pragmas and bootstrap the `meta` table. Entity tables are created
    /// by the migration ladder, which reads its version from `meta`.
    pub fn initialize(&self) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.borrow();

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(storage_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(storage_err)?;

        Ok(())
    }

    /// Run raw SQL. Used by the migration ladder and test fixtures.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        conn.execute_batch(sql).map_err(storage_err)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Execute `f` with a shared reference to the underlying connection.
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn).map_err(storage_err)
    }

    /// Fetch one record's `data` column by id.
    fn get_data<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let sql = format!("SELECT data FROM {table} WHERE id = ?1");
        let mut stmt = conn.prepare_cached(&sql).map_err(storage_err)?;

        match stmt.query_row(params![id], row_data::<T>) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Run a `SELECT data FROM ...` query and parse every row.
    fn query_data<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: rusqlite::Params,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare_cached(sql).map_err(storage_err)?;
        let rows = stmt.query_map(params, row_data::<T>).map_err(storage_err)?;
        let records: rusqlite::Result<Vec<T>> = rows.collect();
        records.map_err(storage_err)
    }

    /// Execute an entity upsert inside `conn` (shared by `put_entity` and the
    /// batched paths).
    fn execute_put(conn: &rusqlite::Connection, entity: &Entity, data: &str) -> rusqlite::Result<()> {
        match entity {
            Entity::Node(n) => {
                conn.execute(
                    "INSERT OR REPLACE INTO nodes (id, kind, updated_at, data) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![n.id, n.kind.as_str(), n.updated_at, data],
                )?;
            }
            Entity::Edge(e) => {
                conn.execute(
                    "INSERT OR REPLACE INTO edges (id, from_id, to_id, kind, updated_at, data) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![e.id, e.from_id, e.to_id, e.kind.as_str(), e.updated_at, data],
                )?;
            }
            Entity::Folder(f) => {
                conn.execute(
                    "INSERT OR REPLACE INTO folders (id, parent_id, position, updated_at, data) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![f.id, f.parent_id, f.position, f.updated_at, data],
                )?;
            }
            Entity::Chat(c) => {
                conn.execute(
                    "INSERT OR REPLACE INTO chats (id, updated_at, data) VALUES (?1, ?2, ?3)",
                    params![c.id, c.updated_at, data],
                )?;
            }
            Entity::ChatMessage(m) => {
                conn.execute(
                    "INSERT OR REPLACE INTO chat_messages (id, chat_id, created_at, data) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![m.id, m.chat_id, m.created_at, data],
                )?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entity reads and writes
    // -----------------------------------------------------------------------

    /// Write one entity (insert or replace). Persistence only — no change is
    /// recorded and no event is emitted.
    pub fn put_entity(&self, entity: &Entity) -> Result<()> {
        let data = entity_data_json(entity)?;
        let guard = self.conn.lock();
        let conn = guard.borrow();
        Self::execute_put(&conn, entity, &data).map_err(storage_err)
    }

    /// Delete one entity row. Returns whether a row existed.
    pub fn delete_entity(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        self.with_conn(|conn| conn.execute(&sql, params![id]).map(|n| n > 0))
    }

    /// Read one entity by kind and id.
    pub fn get_entity(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        Ok(match kind {
            EntityKind::Node => self.get_note(id)?.map(Entity::Node),
            EntityKind::Edge => self.get_edge(id)?.map(Entity::Edge),
            EntityKind::Folder => self.get_folder(id)?.map(Entity::Folder),
            EntityKind::Chat => self.get_chat(id)?.map(Entity::Chat),
            EntityKind::ChatMessage => self.get_chat_message(id)?.map(Entity::ChatMessage),
        })
    }

    /// Read an entity's conflict timestamp without parsing its JSON.
    /// `None` when no row exists.
    pub fn entity_updated_at(&self, kind: EntityKind, id: &str) -> Result<Option<i64>> {
        let column = match kind {
            EntityKind::ChatMessage => "created_at",
            _ => "updated_at",
        };
        let sql = format!("SELECT {column} FROM {} WHERE id = ?1", kind.table());

        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn.prepare_cached(&sql).map_err(storage_err)?;
        match stmt.query_row(params![id], |row| row.get::<_, i64>(0)) {
            Ok(ts) => Ok(Some(ts)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        self.get_data(EntityKind::Node.table(), id)
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<Relationship>> {
        self.get_data(EntityKind::Edge.table(), id)
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        self.get_data(EntityKind::Folder.table(), id)
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatSession>> {
        self.get_data(EntityKind::Chat.table(), id)
    }

    pub fn get_chat_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        self.get_data(EntityKind::ChatMessage.table(), id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All notes, most recently updated first.
    pub fn all_notes(&self) -> Result<Vec<Note>> {
        self.query_data("SELECT data FROM nodes ORDER BY updated_at DESC, id ASC", [])
    }

    /// Notes of one kind, most recently updated first.
    pub fn notes_by_kind(&self, kind: NoteKind) -> Result<Vec<Note>> {
        self.query_data(
            "SELECT data FROM nodes WHERE kind = ?1 ORDER BY updated_at DESC, id ASC",
            params![kind.as_str()],
        )
    }

    pub fn note_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    pub fn all_edges(&self) -> Result<Vec<Relationship>> {
        self.query_data("SELECT data FROM edges ORDER BY updated_at DESC, id ASC", [])
    }

    /// Edges whose source is `note_id`.
    pub fn edges_from(&self, note_id: &str) -> Result<Vec<Relationship>> {
        self.query_data(
            "SELECT data FROM edges WHERE from_id = ?1 ORDER BY id ASC",
            params![note_id],
        )
    }

    /// Edges whose target is `note_id`.
    pub fn edges_to(&self, note_id: &str) -> Result<Vec<Relationship>> {
        self.query_data(
            "SELECT data FROM edges WHERE to_id = ?1 ORDER BY id ASC",
            params![note_id],
        )
    }

    /// All folders in sibling order.
    pub fn all_folders(&self) -> Result<Vec<Folder>> {
        self.query_data("SELECT data FROM folders ORDER BY position ASC, id ASC", [])
    }

    /// Direct children of a folder (`None` = top level), in sibling order.
    pub fn child_folders(&self, parent_id: Option<&str>) -> Result<Vec<Folder>> {
        match parent_id {
            Some(pid) => self.query_data(
                "SELECT data FROM folders WHERE parent_id = ?1 ORDER BY position ASC, id ASC",
                params![pid],
            ),
            None => self.query_data(
                "SELECT data FROM folders WHERE parent_id IS NULL ORDER BY position ASC, id ASC",
                [],
            ),
        }
    }

    /// All chat sessions, most recently updated first.
    pub fn all_chats(&self) -> Result<Vec<ChatSession>> {
        self.query_data("SELECT data FROM chats ORDER BY updated_at DESC, id ASC", [])
    }

    /// Messages of one chat in chronological order.
    pub fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.query_data(
            "SELECT data FROM chat_messages WHERE chat_id = ?1 ORDER BY created_at ASC, id ASC",
            params![chat_id],
        )
    }

    // -----------------------------------------------------------------------
    // Change log
    // -----------------------------------------------------------------------

    /// Append one change. The stored `id` (autoincrement) is returned.
    pub fn append_change(&self, change: &Change) -> Result<i64> {
        let payload = serde_json::to_string(&change.payload)
            .map_err(|e| LoreDbError::Internal(format!("serialize payload: {e}")))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO changes (op, entity, entity_id, payload, ts) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    change.op.as_str(),
                    change.entity.as_str(),
                    change.entity_id,
                    payload,
                    change.ts
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All unpushed changes, oldest first (ascending local id).
    pub fn pending_changes(&self) -> Result<Vec<Change>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, op, entity, entity_id, payload, ts FROM changes ORDER BY id ASC",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map([], row_to_change).map_err(storage_err)?;
        let changes: rusqlite::Result<Vec<Change>> = rows.collect();
        changes.map_err(storage_err)
    }

    pub fn pending_change_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM changes", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }

    /// Delete exactly the given change ids. Returns how many rows went away.
    pub fn prune_changes(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut pruned = 0usize;
        // Chunk to stay under SQLite's bound-variable limit.
        for chunk in ids.chunks(500) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!("DELETE FROM changes WHERE id IN ({placeholders})");
            pruned += conn
                .execute(&sql, rusqlite::params_from_iter(chunk.iter().copied()))
                .map_err(storage_err)?;
        }
        Ok(pruned)
    }

    // -----------------------------------------------------------------------
    // Meta
    // -----------------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        let mut stmt = conn
            .prepare_cached("SELECT value FROM meta WHERE key = ?1")
            .map_err(storage_err)?;

        match stmt.query_row(params![key], |row| row.get::<_, String>(0)) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Run `f` inside a transaction; roll back if it returns `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        // Use a SAVEPOINT so this composes with outer transactions.
        // Each invocation gets a unique name to avoid collisions when nested.
        // ReentrantMutex lets the closure re-acquire the lock for its SQL calls.
        thread_local! {
            static SP_COUNTER: Cell<u64> = const { Cell::new(0) };
        }
        let sp_name = SP_COUNTER.with(|c| {
            let n = c.get();
            c.set(n + 1);
            format!("sp_{n}")
        });

        {
            let guard = self.conn.lock();
            guard
                .borrow()
                .execute(&format!("SAVEPOINT {sp_name}"), [])
                .map_err(storage_err)?;
        }

        match f(self) {
            Ok(v) => {
                let guard = self.conn.lock();
                let release_ok = guard
                    .borrow()
                    .execute(&format!("RELEASE SAVEPOINT {sp_name}"), [])
                    .is_ok();
                drop(guard);
                if release_ok {
                    Ok(v)
                } else {
                    // Best-effort rollback to clean up the leaked savepoint
                    let guard = self.conn.lock();
                    let _ = guard
                        .borrow()
                        .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                    Err(LoreDbError::Storage(StoreError::Transaction {
                        message: "RELEASE SAVEPOINT failed".to_string(),
                        source: None,
                    }))
                }
            }
            Err(e) => {
                let guard = self.conn.lock();
                let _ = guard
                    .borrow()
                    .execute(&format!("ROLLBACK TO SAVEPOINT {sp_name}"), []);
                Err(e)
            }
        }
    }
}
