//! CampaignStore persistence tests — CRUD, query ordering, meta, reopen.

use serde_json::Map;

use lore_db::error::{LoreDbError, StoreError};
use lore_db::store::{migrate, CampaignStore, SqliteStore, StoreOptions};
use lore_db::types::{
    ChatMessage, ChatRole, ChatSession, Entity, EntityKind, Folder, Note, NoteKind, RelKind,
    Relationship,
};

// ============================================================================
// Fixtures
// ============================================================================

fn open_store() -> CampaignStore {
    CampaignStore::open(StoreOptions::default()).unwrap()
}

fn make_note(id: &str, title: &str, updated_at: i64) -> Note {
    Note {
        id: id.to_string(),
        owner_id: "u1".to_string(),
        campaign_id: Some("c1".to_string()),
        campaign_ids: vec!["c1".to_string()],
        kind: NoteKind::Note,
        title: title.to_string(),
        markdown: String::new(),
        attributes: Map::new(),
        created_at: updated_at,
        updated_at,
        has_embedding: None,
        embedded_at: None,
        content_hash: None,
    }
}

fn make_edge(id: &str, from: &str, to: &str) -> Relationship {
    Relationship {
        id: id.to_string(),
        from_id: from.to_string(),
        to_id: to.to_string(),
        from_title: String::new(),
        to_title: String::new(),
        kind: RelKind::Knows,
        campaign_id: Some("c1".to_string()),
        campaign_ids: vec!["c1".to_string()],
        created_at: 1,
        updated_at: 1,
    }
}

fn make_folder(id: &str, name: &str, parent: Option<&str>, position: f64) -> Folder {
    Folder {
        id: id.to_string(),
        name: name.to_string(),
        parent_id: parent.map(str::to_string),
        position,
        note_ids: Vec::new(),
        child_folder_ids: Vec::new(),
        campaign_id: "c1".to_string(),
        owner_id: "u1".to_string(),
        created_at: 1,
        updated_at: 1,
    }
}

fn make_chat(id: &str, updated_at: i64) -> ChatSession {
    ChatSession {
        id: id.to_string(),
        campaign_id: "c1".to_string(),
        owner_id: "u1".to_string(),
        title: "Session".to_string(),
        context_node_id: None,
        created_at: updated_at,
        updated_at,
        message_count: 0,
        is_compacted: None,
    }
}

fn make_message(id: &str, chat_id: &str, created_at: i64) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        campaign_id: "c1".to_string(),
        owner_id: "u1".to_string(),
        role: ChatRole::Human,
        content: "hello".to_string(),
        created_at,
        metadata: None,
        is_compacted: None,
    }
}

// ============================================================================
// CRUD Tests
// ============================================================================

#[test]
fn put_and_get_note_round_trips() {
    let store = open_store();
    let note = make_note("n1", "Strahd", 100);

    store.put(&Entity::Node(note.clone())).unwrap();

    assert_eq!(store.get_note("n1").unwrap(), Some(note));
}

#[test]
fn get_missing_note_returns_none() {
    let store = open_store();
    assert_eq!(store.get_note("ghost").unwrap(), None);
}

#[test]
fn put_and_get_each_entity_kind() {
    let store = open_store();
    let edge = make_edge("e1", "n1", "n2");
    let folder = make_folder("f1", "NPCs", None, 1.0);
    let chat = make_chat("ch1", 10);
    let msg = make_message("m1", "ch1", 10);

    store.put(&Entity::Edge(edge.clone())).unwrap();
    store.put(&Entity::Folder(folder.clone())).unwrap();
    store.put(&Entity::Chat(chat.clone())).unwrap();
    store.put(&Entity::ChatMessage(msg.clone())).unwrap();

    assert_eq!(store.get_edge("e1").unwrap(), Some(edge.clone()));
    assert_eq!(store.get_folder("f1").unwrap(), Some(folder));
    assert_eq!(store.get_chat("ch1").unwrap(), Some(chat));
    assert_eq!(store.get_chat_message("m1").unwrap(), Some(msg));

    // Uniform dispatch reads the same rows
    assert_eq!(
        store.get_entity(EntityKind::Edge, "e1").unwrap(),
        Some(Entity::Edge(edge))
    );
}

#[test]
fn put_replaces_existing_row() {
    let store = open_store();
    store.put(&Entity::Node(make_note("n1", "Before", 100))).unwrap();
    store.put(&Entity::Node(make_note("n1", "After", 200))).unwrap();

    assert_eq!(store.note_count().unwrap(), 1);
    assert_eq!(store.get_note("n1").unwrap().unwrap().title, "After");
}

#[test]
fn delete_reports_whether_row_existed() {
    let store = open_store();
    store.put(&Entity::Node(make_note("n1", "Strahd", 100))).unwrap();

    assert!(store.delete(EntityKind::Node, "n1").unwrap());
    assert_eq!(store.get_note("n1").unwrap(), None);
    assert!(!store.delete(EntityKind::Node, "n1").unwrap());
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn all_notes_most_recent_first() {
    let store = open_store();
    store.put(&Entity::Node(make_note("a", "Old", 100))).unwrap();
    store.put(&Entity::Node(make_note("b", "New", 300))).unwrap();
    store.put(&Entity::Node(make_note("c", "Mid", 200))).unwrap();

    let titles: Vec<String> = store
        .all_notes()
        .unwrap()
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles, vec!["New", "Mid", "Old"]);
}

#[test]
fn all_notes_ties_break_by_id() {
    let store = open_store();
    store.put(&Entity::Node(make_note("b", "B", 100))).unwrap();
    store.put(&Entity::Node(make_note("a", "A", 100))).unwrap();

    let ids: Vec<String> = store.all_notes().unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn notes_by_kind_filters() {
    let store = open_store();
    let mut npc = make_note("n1", "Strahd", 100);
    npc.kind = NoteKind::Npc;
    store.put(&Entity::Node(npc)).unwrap();
    store.put(&Entity::Node(make_note("n2", "Plain", 200))).unwrap();

    let npcs = store.notes_by_kind(NoteKind::Npc).unwrap();
    assert_eq!(npcs.len(), 1);
    assert_eq!(npcs[0].id, "n1");
}

#[test]
fn note_count_ignores_other_tables() {
    let store = open_store();
    store.put(&Entity::Node(make_note("n1", "Strahd", 100))).unwrap();
    store.put(&Entity::Edge(make_edge("e1", "n1", "n2"))).unwrap();

    assert_eq!(store.note_count().unwrap(), 1);
}

#[test]
fn edges_filter_by_endpoint() {
    let store = open_store();
    store.put(&Entity::Edge(make_edge("e1", "a", "b"))).unwrap();
    store.put(&Entity::Edge(make_edge("e2", "a", "c"))).unwrap();
    store.put(&Entity::Edge(make_edge("e3", "b", "a"))).unwrap();

    assert_eq!(store.edges_from("a").unwrap().len(), 2);
    assert_eq!(store.edges_to("a").unwrap().len(), 1);
    assert_eq!(store.all_edges().unwrap().len(), 3);
}

#[test]
fn folders_in_sibling_order() {
    let store = open_store();
    store.put(&Entity::Folder(make_folder("f1", "Z", None, 2.0))).unwrap();
    store.put(&Entity::Folder(make_folder("f2", "A", None, 1.0))).unwrap();
    // Fractional position from a drag between siblings
    store.put(&Entity::Folder(make_folder("f3", "M", None, 1.5))).unwrap();

    let names: Vec<String> = store
        .all_folders()
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["A", "M", "Z"]);
}

#[test]
fn child_folders_splits_top_level_from_nested() {
    let store = open_store();
    store.put(&Entity::Folder(make_folder("root", "Root", None, 1.0))).unwrap();
    store.put(&Entity::Folder(make_folder("kid1", "Kid 1", Some("root"), 1.0))).unwrap();
    store.put(&Entity::Folder(make_folder("kid2", "Kid 2", Some("root"), 2.0))).unwrap();

    let top = store.child_folders(None).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].id, "root");

    let kids: Vec<String> = store
        .child_folders(Some("root"))
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(kids, vec!["kid1", "kid2"]);
}

#[test]
fn chat_messages_in_chronological_order() {
    let store = open_store();
    store.put(&Entity::Chat(make_chat("ch1", 10))).unwrap();
    store.put(&Entity::ChatMessage(make_message("m3", "ch1", 30))).unwrap();
    store.put(&Entity::ChatMessage(make_message("m1", "ch1", 10))).unwrap();
    store.put(&Entity::ChatMessage(make_message("m2", "ch1", 20))).unwrap();
    store.put(&Entity::ChatMessage(make_message("other", "ch2", 5))).unwrap();

    let ids: Vec<String> = store
        .messages_for_chat("ch1")
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[test]
fn chats_most_recent_first() {
    let store = open_store();
    store.put(&Entity::Chat(make_chat("ch1", 100))).unwrap();
    store.put(&Entity::Chat(make_chat("ch2", 200))).unwrap();

    let ids: Vec<String> = store.all_chats().unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["ch2", "ch1"]);
}

// ============================================================================
// Meta and Sync Cursor Tests
// ============================================================================

#[test]
fn meta_round_trip() {
    let store = open_store();
    assert_eq!(store.get_meta("theme").unwrap(), None);

    store.set_meta("theme", "dark").unwrap();
    assert_eq!(store.get_meta("theme").unwrap(), Some("dark".to_string()));

    store.set_meta("theme", "light").unwrap();
    assert_eq!(store.get_meta("theme").unwrap(), Some("light".to_string()));
}

#[test]
fn pull_cursor_defaults_to_zero() {
    let store = open_store();
    assert_eq!(store.pull_cursor().unwrap(), 0);

    store.set_pull_cursor(12345).unwrap();
    assert_eq!(store.pull_cursor().unwrap(), 12345);
}

#[test]
fn last_synced_at_defaults_to_none() {
    let store = open_store();
    assert_eq!(store.last_synced_at().unwrap(), None);

    store.set_last_synced_at(999).unwrap();
    assert_eq!(store.last_synced_at().unwrap(), Some(999));
}

#[test]
fn corrupt_cursor_meta_surfaces_corruption() {
    let store = open_store();
    store.set_meta("sync:cursor", "not a number").unwrap();

    let err = store.pull_cursor().unwrap_err();
    assert!(matches!(
        err,
        LoreDbError::Storage(StoreError::Corruption { .. })
    ));
}

// ============================================================================
// Open / Reopen Tests
// ============================================================================

#[test]
fn campaign_scope_is_recorded() {
    let scoped = CampaignStore::open(StoreOptions {
        campaign: Some("ravenloft".to_string()),
        path: None,
    })
    .unwrap();
    assert_eq!(scoped.campaign(), Some("ravenloft"));

    let global = open_store();
    assert_eq!(global.campaign(), None);
}

#[test]
fn invalid_campaign_slug_rejected() {
    let err = CampaignStore::open(StoreOptions {
        campaign: Some("Not A Slug".to_string()),
        path: None,
    })
    .unwrap_err();
    assert!(matches!(
        err,
        LoreDbError::Storage(StoreError::InvalidCampaign(_))
    ));
}

#[test]
fn file_backed_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join("ravenloft.db")
        .to_str()
        .unwrap()
        .to_string();

    {
        let store = CampaignStore::open(StoreOptions {
            campaign: Some("ravenloft".to_string()),
            path: Some(path.clone()),
        })
        .unwrap();
        store.put(&Entity::Node(make_note("n1", "Strahd", 100))).unwrap();
        store.set_pull_cursor(42).unwrap();
    }

    let reopened = CampaignStore::open(StoreOptions {
        campaign: Some("ravenloft".to_string()),
        path: Some(path),
    })
    .unwrap();
    assert_eq!(reopened.get_note("n1").unwrap().unwrap().title, "Strahd");
    assert_eq!(reopened.pull_cursor().unwrap(), 42);
}

#[test]
fn corrupt_data_column_surfaces_error() {
    let db = SqliteStore::open_in_memory().unwrap();
    db.initialize().unwrap();
    migrate::run(&db).unwrap();
    db.execute_batch(
        "INSERT INTO nodes (id, kind, updated_at, data) VALUES ('bad', 'Note', 0, '{not json');",
    )
    .unwrap();

    assert!(db.get_note("bad").is_err());
    assert!(db.all_notes().is_err());
}
