//! Schema migration tests — version ladder, v2 campaignIds backfill, failure
//! behavior.

use lore_db::error::LoreDbError;
use lore_db::store::{migrate, CampaignStore, SqliteStore, StoreOptions, SCHEMA_VERSION};

/// Tables as they existed at schema v1, for building legacy fixtures.
const V1_FIXTURE_DDL: &str = "
CREATE TABLE nodes (
    id         TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE edges (
    id         TEXT PRIMARY KEY,
    from_id    TEXT NOT NULL,
    to_id      TEXT NOT NULL,
    kind       TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE folders (
    id         TEXT PRIMARY KEY,
    parent_id  TEXT,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE chats (
    id         TEXT PRIMARY KEY,
    updated_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE chat_messages (
    id         TEXT PRIMARY KEY,
    chat_id    TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0,
    data       TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE changes (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    op        TEXT NOT NULL,
    entity    TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload   TEXT NOT NULL DEFAULT '{}',
    ts        INTEGER NOT NULL
);
INSERT INTO meta (key, value) VALUES ('schema:version', '1');
";

fn temp_db_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("campaign.db").to_str().unwrap().to_string()
}

/// Build a file-backed database frozen at schema v1 with the given rows.
fn v1_fixture(path: &str, extra_sql: &str) {
    let db = SqliteStore::open(path).unwrap();
    db.initialize().unwrap();
    db.execute_batch(V1_FIXTURE_DDL).unwrap();
    db.execute_batch(extra_sql).unwrap();
}

// ============================================================================
// Version Ladder Tests
// ============================================================================

#[test]
fn fresh_store_lands_on_current_version() {
    let store = CampaignStore::open(StoreOptions::default()).unwrap();
    assert_eq!(
        store.get_meta("schema:version").unwrap(),
        Some(SCHEMA_VERSION.to_string())
    );
}

#[test]
fn reopen_at_current_version_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);

    {
        let store = CampaignStore::open(StoreOptions {
            campaign: None,
            path: Some(path.clone()),
        })
        .unwrap();
        store.set_meta("marker", "kept").unwrap();
    }

    let reopened = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path),
    })
    .unwrap();
    assert_eq!(reopened.get_meta("marker").unwrap(), Some("kept".to_string()));
    assert_eq!(
        reopened.get_meta("schema:version").unwrap(),
        Some(SCHEMA_VERSION.to_string())
    );
}

#[test]
fn newer_database_version_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);
    v1_fixture(&path, "UPDATE meta SET value = '99' WHERE key = 'schema:version';");

    // A database from a future build opens without downgrading.
    let store = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path),
    })
    .unwrap();
    assert_eq!(store.get_meta("schema:version").unwrap(), Some("99".to_string()));
}

// ============================================================================
// v2 Backfill Tests
// ============================================================================

#[test]
fn v1_records_gain_campaign_ids_on_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);
    v1_fixture(
        &path,
        r#"
        INSERT INTO nodes (id, kind, updated_at, data) VALUES
            ('n1', 'Note', 100, '{"id":"n1","title":"Old Note","campaignId":"c1"}');
        INSERT INTO edges (id, from_id, to_id, kind, updated_at, data) VALUES
            ('e1', 'a', 'b', 'KNOWS',
             100, '{"id":"e1","fromId":"a","toId":"b","relType":"KNOWS","campaignId":"c1"}');
        "#,
    );

    let store = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path),
    })
    .unwrap();

    let note = store.get_note("n1").unwrap().unwrap();
    assert_eq!(note.campaign_ids, vec!["c1".to_string()]);
    assert_eq!(note.campaign_id.as_deref(), Some("c1"));

    let edge = store.get_edge("e1").unwrap().unwrap();
    assert_eq!(edge.campaign_ids, vec!["c1".to_string()]);

    assert_eq!(
        store.get_meta("schema:version").unwrap(),
        Some(SCHEMA_VERSION.to_string())
    );
}

#[test]
fn global_records_stay_global_after_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);
    v1_fixture(
        &path,
        r#"
        INSERT INTO nodes (id, kind, updated_at, data) VALUES
            ('n1', 'Rule', 100, '{"id":"n1","title":"House Rules","type":"Rule"}');
        "#,
    );

    let store = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path),
    })
    .unwrap();

    let note = store.get_note("n1").unwrap().unwrap();
    assert!(note.campaign_ids.is_empty());
    assert_eq!(note.campaign_id, None);
}

#[test]
fn records_with_campaign_ids_pass_through_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);
    v1_fixture(
        &path,
        r#"
        INSERT INTO nodes (id, kind, updated_at, data) VALUES
            ('n1', 'Note', 100,
             '{"id":"n1","title":"Shared","campaignId":"c1","campaignIds":["c1","c2"]}');
        "#,
    );

    let store = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path),
    })
    .unwrap();

    let note = store.get_note("n1").unwrap().unwrap();
    assert_eq!(note.campaign_ids, vec!["c1".to_string(), "c2".to_string()]);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn failed_step_reports_version_and_leaves_previous_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir);

    // A nodes table without the data column makes the v2 backfill's read
    // fail. It keeps kind and updated_at so the v1 step's index creation
    // still succeeds.
    {
        let db = SqliteStore::open(&path).unwrap();
        db.initialize().unwrap();
        db.execute_batch(
            "CREATE TABLE nodes (
                id         TEXT PRIMARY KEY,
                kind       TEXT NOT NULL DEFAULT '',
                updated_at INTEGER NOT NULL DEFAULT 0
            );",
        )
        .unwrap();
    }

    let err = CampaignStore::open(StoreOptions {
        campaign: None,
        path: Some(path.clone()),
    })
    .unwrap_err();

    match err {
        LoreDbError::Migration(m) => {
            assert_eq!(m.failed_at, 2);
            assert_eq!(m.from_version, 0);
            assert_eq!(m.to_version, SCHEMA_VERSION);
        }
        other => panic!("expected migration error, got {other:?}"),
    }

    // The completed v1 step stays committed; the failed v2 step does not.
    let db = SqliteStore::open(&path).unwrap();
    assert_eq!(migrate::current_version(&db).unwrap(), 1);
}
