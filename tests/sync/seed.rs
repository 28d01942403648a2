//! SeedLoader tests — empty-store gating, snapshot parsing, race handling.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use lore_db::error::{LoreDbError, SyncError};
use lore_db::sync::types::*;
use lore_db::sync::{SeedLoader, SeedOutcome};
use lore_db::types::{ApplyOutcome, Change, Note, RemoteChange};

// ============================================================================
// Shared mock infrastructure
// ============================================================================

struct MockTransportInner {
    snapshot_calls: usize,
    snapshot_response: Option<Box<dyn Fn() -> Result<Vec<Value>, SyncTransportError> + Send + Sync>>,
}

struct MockTransport {
    inner: Mutex<MockTransportInner>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            inner: Mutex::new(MockTransportInner {
                snapshot_calls: 0,
                snapshot_response: None,
            }),
        }
    }

    fn on_snapshot<F>(&self, f: F)
    where
        F: Fn() -> Result<Vec<Value>, SyncTransportError> + Send + Sync + 'static,
    {
        self.inner.lock().snapshot_response = Some(Box::new(f));
    }

    fn snapshot_calls(&self) -> usize {
        self.inner.lock().snapshot_calls
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn push_changes(
        &self,
        _campaign: Option<&str>,
        changes: &[ChangeUpload],
    ) -> Result<PushOutcome, SyncTransportError> {
        Ok(PushOutcome {
            acked: changes.iter().map(|c| c.id).collect(),
        })
    }

    async fn pull_changes(
        &self,
        _campaign: Option<&str>,
        _since: i64,
    ) -> Result<PullBatch, SyncTransportError> {
        Ok(PullBatch::default())
    }

    async fn fetch_snapshot(
        &self,
        _campaign: Option<&str>,
    ) -> Result<Vec<Value>, SyncTransportError> {
        let mut inner = self.inner.lock();
        inner.snapshot_calls += 1;
        match &inner.snapshot_response {
            Some(f) => f(),
            None => Ok(Vec::new()),
        }
    }
}

struct MockStoreInner {
    note_count: usize,
    seeded: Vec<Note>,
    seed_result: Option<usize>,
}

struct MockStore {
    campaign: Option<String>,
    inner: Mutex<MockStoreInner>,
}

impl MockStore {
    fn new() -> Self {
        Self {
            campaign: Some("ravenloft".to_string()),
            inner: Mutex::new(MockStoreInner {
                note_count: 0,
                seeded: Vec::new(),
                seed_result: None,
            }),
        }
    }

    fn with_notes(count: usize) -> Self {
        let store = Self::new();
        store.inner.lock().note_count = count;
        store
    }

    fn set_seed_result(&self, inserted: usize) {
        self.inner.lock().seed_result = Some(inserted);
    }

    fn seeded(&self) -> Vec<Note> {
        self.inner.lock().seeded.clone()
    }
}

impl SyncStore for MockStore {
    fn campaign(&self) -> Option<&str> {
        self.campaign.as_deref()
    }

    fn pending_changes(&self) -> lore_db::error::Result<Vec<Change>> {
        Ok(Vec::new())
    }

    fn prune_changes(&self, ids: &[i64]) -> lore_db::error::Result<usize> {
        Ok(ids.len())
    }

    fn apply_remote_changes(&self, changes: &[RemoteChange]) -> lore_db::error::Result<ApplyOutcome> {
        Ok(ApplyOutcome {
            applied: changes.len(),
            skipped: 0,
            malformed: Vec::new(),
        })
    }

    fn pull_cursor(&self) -> lore_db::error::Result<i64> {
        Ok(0)
    }

    fn set_pull_cursor(&self, _cursor: i64) -> lore_db::error::Result<()> {
        Ok(())
    }

    fn set_last_synced_at(&self, _ts: i64) -> lore_db::error::Result<()> {
        Ok(())
    }

    fn note_count(&self) -> lore_db::error::Result<usize> {
        Ok(self.inner.lock().note_count)
    }

    fn seed_notes(&self, notes: &[Note]) -> lore_db::error::Result<usize> {
        let mut inner = self.inner.lock();
        inner.seeded = notes.to_vec();
        match inner.seed_result {
            Some(n) => Ok(n),
            None => Ok(notes.len()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn snapshot_note(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "markdown": "",
        "type": "Note",
        "campaignIds": ["rav-1"],
        "createdAt": 1000,
        "updatedAt": 1000,
    })
}

fn make_loader(transport: Arc<MockTransport>, store: Arc<MockStore>) -> SeedLoader {
    SeedLoader::new(transport, store)
}

// ============================================================================
// Seeding Tests
// ============================================================================

#[tokio::test]
async fn seeds_empty_store_from_snapshot() {
    let transport = Arc::new(MockTransport::new());
    transport.on_snapshot(|| Ok(vec![snapshot_note("n1", "Strahd"), snapshot_note("n2", "Ireena")]));
    let store = Arc::new(MockStore::new());
    let loader = make_loader(transport, store.clone());

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Seeded(2));
    let seeded = store.seeded();
    assert_eq!(seeded.len(), 2);
    assert_eq!(seeded[0].id, "n1");
    assert_eq!(seeded[1].title, "Ireena");
}

#[tokio::test]
async fn skips_non_empty_store_without_fetching() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::with_notes(3));
    let loader = make_loader(transport.clone(), store.clone());

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Skipped);
    assert_eq!(transport.snapshot_calls(), 0);
    assert!(store.seeded().is_empty());
}

#[tokio::test]
async fn empty_snapshot_seeds_zero_notes() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MockStore::new());
    let loader = make_loader(transport, store);

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Seeded(0));
}

#[tokio::test]
async fn malformed_snapshot_records_are_skipped() {
    let transport = Arc::new(MockTransport::new());
    transport.on_snapshot(|| {
        Ok(vec![
            snapshot_note("n1", "Strahd"),
            json!("not an object"),
            json!({"id": 42}), // wrong types
            snapshot_note("n2", "Ireena"),
        ])
    });
    let store = Arc::new(MockStore::new());
    let loader = make_loader(transport, store.clone());

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Seeded(2));
    assert_eq!(store.seeded().len(), 2);
}

#[tokio::test]
async fn legacy_single_campaign_records_parse() {
    let transport = Arc::new(MockTransport::new());
    transport.on_snapshot(|| {
        Ok(vec![json!({
            "id": "n1",
            "title": "Old Note",
            "markdown": "",
            "type": "Note",
            "campaignId": "rav-1",
            "createdAt": 1000,
            "updatedAt": 1000,
        })])
    });
    let store = Arc::new(MockStore::new());
    let loader = make_loader(transport, store.clone());

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Seeded(1));
    let seeded = store.seeded();
    assert_eq!(seeded[0].campaign_id.as_deref(), Some("rav-1"));
}

#[tokio::test]
async fn transport_failure_propagates() {
    let transport = Arc::new(MockTransport::new());
    transport.on_snapshot(|| Err(SyncTransportError::new("server unavailable")));
    let store = Arc::new(MockStore::new());
    let loader = make_loader(transport, store.clone());

    let result = loader.seed_if_empty().await;

    assert!(matches!(
        result,
        Err(LoreDbError::Sync(SyncError::Transport(_)))
    ));
    assert!(store.seeded().is_empty());
}

#[tokio::test]
async fn concurrent_write_between_check_and_seed_skips() {
    let transport = Arc::new(MockTransport::new());
    transport.on_snapshot(|| Ok(vec![snapshot_note("n1", "Strahd")]));
    let store = Arc::new(MockStore::new());
    // The store reports empty up front but inserts nothing, as if a local
    // write landed between the check and the transaction.
    store.set_seed_result(0);
    let loader = make_loader(transport, store);

    let outcome = loader.seed_if_empty().await.unwrap();

    assert_eq!(outcome, SeedOutcome::Skipped);
}
