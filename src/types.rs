//! Core record types shared by the store and sync layers.
//!
//! All entities serialize as the camelCase JSON used both on the wire and in
//! the SQLite `data` columns, so a record read from the backend and a record
//! read from disk deserialize through the same path.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

// ============================================================================
// Campaign scope
// ============================================================================

/// Wire slug used for the unscoped (global) campaign.
pub const GLOBAL_CAMPAIGN_SLUG: &str = "global";

static SLUG_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn slug_regex() -> &'static regex::Regex {
    SLUG_REGEX
        .get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug regex is valid"))
}

/// Validate a campaign slug for use in store keys and sync URL paths.
pub fn validate_campaign_slug(slug: &str) -> Result<(), StoreError> {
    if !slug.is_empty() && slug.len() <= 64 && slug_regex().is_match(slug) {
        Ok(())
    } else {
        Err(StoreError::InvalidCampaign(slug.to_string()))
    }
}

/// Wire slug for an optional campaign scope (`None` = global).
pub fn campaign_slug(campaign: Option<&str>) -> &str {
    campaign.unwrap_or(GLOBAL_CAMPAIGN_SLUG)
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ============================================================================
// Closed enumerations
// ============================================================================

/// Closed set of note types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteKind {
    Note,
    Character,
    Location,
    Quest,
    Event,
    Session,
    #[serde(rename = "NPC")]
    Npc,
    Item,
    Lore,
    Rule,
}

impl Default for NoteKind {
    fn default() -> Self {
        NoteKind::Note
    }
}

impl NoteKind {
    /// Wire name (matches the serde spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteKind::Note => "Note",
            NoteKind::Character => "Character",
            NoteKind::Location => "Location",
            NoteKind::Quest => "Quest",
            NoteKind::Event => "Event",
            NoteKind::Session => "Session",
            NoteKind::Npc => "NPC",
            NoteKind::Item => "Item",
            NoteKind::Lore => "Lore",
            NoteKind::Rule => "Rule",
        }
    }
}

/// Closed set of relationship types (SCREAMING_SNAKE on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelKind {
    Depicts,
    Follows,
    From,
    Involves,
    Knows,
    LivesIn,
    Mentions,
    OccursIn,
    PartOf,
    Within,
}

impl RelKind {
    /// Wire name (matches the serde spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            RelKind::Depicts => "DEPICTS",
            RelKind::Follows => "FOLLOWS",
            RelKind::From => "FROM",
            RelKind::Involves => "INVOLVES",
            RelKind::Knows => "KNOWS",
            RelKind::LivesIn => "LIVES_IN",
            RelKind::Mentions => "MENTIONS",
            RelKind::OccursIn => "OCCURS_IN",
            RelKind::PartOf => "PART_OF",
            RelKind::Within => "WITHIN",
        }
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Ai,
    System,
}

/// Kind of local mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
    Upsert,
}

impl ChangeOp {
    /// Wire name (matches the serde spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Create => "create",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
            ChangeOp::Upsert => "upsert",
        }
    }
}

/// Which entity table a change targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Node,
    Edge,
    Folder,
    Chat,
    ChatMessage,
}

impl EntityKind {
    /// Wire name (matches the serde spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Edge => "edge",
            EntityKind::Folder => "folder",
            EntityKind::Chat => "chat",
            EntityKind::ChatMessage => "chatMessage",
        }
    }

    /// SQLite table backing this entity kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Node => "nodes",
            EntityKind::Edge => "edges",
            EntityKind::Folder => "folders",
            EntityKind::Chat => "chats",
            EntityKind::ChatMessage => "chat_messages",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A campaign document (character sheet, location, session log, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    /// Legacy single-campaign reference; `None` = global.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    /// Campaign memberships — superset of `campaign_id`. Legacy records may
    /// arrive without it; see [`Note::backfill_campaign_ids`].
    #[serde(default)]
    pub campaign_ids: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: NoteKind,
    pub title: String,
    #[serde(default)]
    pub markdown: String,
    /// Open mapping of extra metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    /// Cache fields owned by the external embedding indexer; the store
    /// carries them opaquely and never interprets them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_embedding: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Note {
    /// Ensure a non-null `campaign_id` appears in `campaign_ids`.
    ///
    /// Legacy records carry only the single-campaign field; ingest paths
    /// (seeding, schema migration) call this so readers can rely on
    /// `campaign_ids` alone.
    pub fn backfill_campaign_ids(&mut self) {
        if let Some(cid) = &self.campaign_id {
            if !self.campaign_ids.iter().any(|c| c == cid) {
                self.campaign_ids.push(cid.clone());
            }
        }
    }
}

/// A directed typed link between two notes.
///
/// `from_id`/`to_id` may dangle transiently while sync is in flight; readers
/// must tolerate that. `from_title`/`to_title` are denormalized for display
/// and can go stale between a rename and the next sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(default)]
    pub from_title: String,
    #[serde(default)]
    pub to_title: String,
    #[serde(rename = "relType")]
    pub kind: RelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub campaign_ids: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Relationship {
    /// See [`Note::backfill_campaign_ids`].
    pub fn backfill_campaign_ids(&mut self) {
        if let Some(cid) = &self.campaign_id {
            if !self.campaign_ids.iter().any(|c| c == cid) {
                self.campaign_ids.push(cid.clone());
            }
        }
    }
}

/// Sidebar folder tree entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Fractional so drag-reorder can insert between siblings.
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub note_ids: Vec<String>,
    #[serde(default)]
    pub child_folder_ids: Vec<String>,
    pub campaign_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// An AI chat session scoped to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_node_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compacted: Option<bool>,
}

/// A single message within a chat session. Messages are immutable once
/// written; `created_at` doubles as their conflict timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub owner_id: String,
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_compacted: Option<bool>,
}

// ============================================================================
// Change log
// ============================================================================

/// Append-only record of one local mutation.
///
/// `id` is assigned by SQLite on insert and orders changes within this client
/// only — it is never compared across clients. `payload` holds the full
/// record state as serialized at write time (`{"id": ...}` for deletes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(default)]
    pub id: i64,
    pub op: ChangeOp,
    pub entity: EntityKind,
    pub entity_id: String,
    #[serde(default)]
    pub payload: Value,
    pub ts: i64,
}

// ============================================================================
// Remote changes
// ============================================================================

/// A change fetched from the backend during pull.
///
/// Shares the local [`Change`] shape minus the client-assigned `id` — remote
/// change ids from other clients carry no meaning here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChange {
    pub op: ChangeOp,
    pub entity: EntityKind,
    pub entity_id: String,
    #[serde(default)]
    pub payload: Value,
    pub ts: i64,
}

impl RemoteChange {
    /// Conflict timestamp: the payload's `updatedAt` when present, falling
    /// back to the change's own `ts`.
    pub fn effective_updated_at(&self) -> i64 {
        self.payload
            .get("updatedAt")
            .and_then(Value::as_i64)
            .unwrap_or(self.ts)
    }
}

/// Per-record failure recorded while applying a remote batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedChange {
    pub entity: EntityKind,
    pub entity_id: String,
    pub error: String,
}

/// Result of applying one batch of remote changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Records inserted, replaced, or deleted.
    pub applied: usize,
    /// Changes skipped because the local record was newer.
    pub skipped: usize,
    /// Changes whose payload could not be interpreted. The rest of the batch
    /// still applies.
    pub malformed: Vec<MalformedChange>,
}

// ============================================================================
// Entity — uniform dispatch over the five entity types
// ============================================================================

/// One value of any entity type, for code paths (change recording, remote
/// apply, seeding) that operate uniformly across tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Note),
    Edge(Relationship),
    Folder(Folder),
    Chat(ChatSession),
    ChatMessage(ChatMessage),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Edge(_) => EntityKind::Edge,
            Entity::Folder(_) => EntityKind::Folder,
            Entity::Chat(_) => EntityKind::Chat,
            Entity::ChatMessage(_) => EntityKind::ChatMessage,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Node(n) => &n.id,
            Entity::Edge(e) => &e.id,
            Entity::Folder(f) => &f.id,
            Entity::Chat(c) => &c.id,
            Entity::ChatMessage(m) => &m.id,
        }
    }

    /// Conflict timestamp. Chat messages are immutable, so their creation
    /// time stands in for `updated_at`.
    pub fn updated_at(&self) -> i64 {
        match self {
            Entity::Node(n) => n.updated_at,
            Entity::Edge(e) => e.updated_at,
            Entity::Folder(f) => f.updated_at,
            Entity::Chat(c) => c.updated_at,
            Entity::ChatMessage(m) => m.created_at,
        }
    }

    /// Raise `updated_at` to at least `floor`, keeping the timestamp
    /// non-decreasing across local mutations. No-op for chat messages.
    pub fn raise_updated_at(&mut self, floor: i64) {
        match self {
            Entity::Node(n) => n.updated_at = n.updated_at.max(floor),
            Entity::Edge(e) => e.updated_at = e.updated_at.max(floor),
            Entity::Folder(f) => f.updated_at = f.updated_at.max(floor),
            Entity::Chat(c) => c.updated_at = c.updated_at.max(floor),
            Entity::ChatMessage(_) => {}
        }
    }

    /// Serialize to the JSON stored in the `data` column and carried in
    /// change payloads.
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Entity::Node(n) => serde_json::to_value(n),
            Entity::Edge(e) => serde_json::to_value(e),
            Entity::Folder(f) => serde_json::to_value(f),
            Entity::Chat(c) => serde_json::to_value(c),
            Entity::ChatMessage(m) => serde_json::to_value(m),
        }
    }

    /// Parse a payload as the given entity kind.
    pub fn from_payload(kind: EntityKind, payload: &Value) -> Result<Entity, serde_json::Error> {
        match kind {
            EntityKind::Node => serde_json::from_value(payload.clone()).map(Entity::Node),
            EntityKind::Edge => serde_json::from_value(payload.clone()).map(Entity::Edge),
            EntityKind::Folder => serde_json::from_value(payload.clone()).map(Entity::Folder),
            EntityKind::Chat => serde_json::from_value(payload.clone()).map(Entity::Chat),
            EntityKind::ChatMessage => {
                serde_json::from_value(payload.clone()).map(Entity::ChatMessage)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
