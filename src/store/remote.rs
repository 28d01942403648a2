//! Last-write-wins application of remote changes.
//!
//! [`decide`] is a pure function from (local record, remote change) to a
//! [`RemoteDecision`]; [`apply_batch`] runs one batch of decisions inside a
//! single transaction. The timestamp rule:
//!
//!   - remote strictly older than local  -> skip
//!   - remote equal or newer             -> remote wins (ties included)
//!
//! Deletes follow the same rule; deleting an absent record is applied as a
//! no-op so replayed batches stay idempotent.

use serde_json::Value;

use crate::error::Result;
use crate::types::{
    ApplyOutcome, ChangeOp, Entity, EntityKind, MalformedChange, RemoteChange,
};

use super::sqlite::SqliteStore;

/// What to do with one remote change.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteDecision {
    Upsert(Entity),
    Delete { kind: EntityKind, id: String },
    Skip,
    Malformed(String),
}

/// Decide how `change` applies over the current `local` record.
pub(crate) fn decide(local: Option<&Entity>, change: &RemoteChange) -> RemoteDecision {
    let remote_ts = change.effective_updated_at();

    if let Some(local_ts) = local.map(Entity::updated_at) {
        if remote_ts < local_ts {
            return RemoteDecision::Skip;
        }
    }

    match change.op {
        ChangeOp::Delete => RemoteDecision::Delete {
            kind: change.entity,
            id: change.entity_id.clone(),
        },
        // Creates and upserts always carry the full record.
        ChangeOp::Create | ChangeOp::Upsert => upsert_from(change, None, remote_ts),
        // Updates may carry a partial record; merge over the stored one.
        ChangeOp::Update => upsert_from(change, local, remote_ts),
    }
}

fn upsert_from(change: &RemoteChange, merge_base: Option<&Entity>, remote_ts: i64) -> RemoteDecision {
    let built = match merge_base {
        Some(base) => merged_payload(base, &change.payload).and_then(|data| {
            Entity::from_payload(change.entity, &data).map_err(|e| format!("merged payload: {e}"))
        }),
        None => Entity::from_payload(change.entity, &change.payload)
            .map_err(|e| format!("payload: {e}")),
    };

    let mut entity = match built {
        Ok(entity) => entity,
        Err(error) => return RemoteDecision::Malformed(error),
    };

    if entity.id() != change.entity_id {
        return RemoteDecision::Malformed(format!(
            "payload id \"{}\" does not match entity id \"{}\"",
            entity.id(),
            change.entity_id
        ));
    }

    // The stored conflict timestamp must cover the timestamp this change won
    // with, even when the payload itself lacks `updatedAt`.
    entity.raise_updated_at(remote_ts);

    match &mut entity {
        Entity::Node(n) => n.backfill_campaign_ids(),
        Entity::Edge(e) => e.backfill_campaign_ids(),
        _ => {}
    }

    RemoteDecision::Upsert(entity)
}

/// Shallow-merge an update payload over the local record's JSON.
fn merged_payload(base: &Entity, patch: &Value) -> std::result::Result<Value, String> {
    let Value::Object(patch_map) = patch else {
        return Err("update payload is not an object".to_string());
    };
    let mut data = base
        .to_payload()
        .map_err(|e| format!("local record: {e}"))?;
    if let Value::Object(map) = &mut data {
        for (key, value) in patch_map {
            map.insert(key.clone(), value.clone());
        }
    }
    Ok(data)
}

/// Apply a batch of remote changes in one transaction.
///
/// Returns the outcome plus the `(kind, id)` of every record actually
/// written, in apply order, for post-commit change notifications. Malformed
/// changes are recorded and skipped; storage failures roll the whole batch
/// back.
pub(crate) fn apply_batch(
    store: &SqliteStore,
    changes: &[RemoteChange],
) -> Result<(ApplyOutcome, Vec<(EntityKind, String)>)> {
    store.transaction(|s| {
        let mut outcome = ApplyOutcome::default();
        let mut touched: Vec<(EntityKind, String)> = Vec::new();

        for change in changes {
            let local = s.get_entity(change.entity, &change.entity_id)?;
            match decide(local.as_ref(), change) {
                RemoteDecision::Upsert(entity) => {
                    s.put_entity(&entity)?;
                    touched.push((entity.kind(), entity.id().to_string()));
                    outcome.applied += 1;
                }
                RemoteDecision::Delete { kind, id } => {
                    s.delete_entity(kind, &id)?;
                    touched.push((kind, id));
                    outcome.applied += 1;
                }
                RemoteDecision::Skip => outcome.skipped += 1,
                RemoteDecision::Malformed(error) => {
                    outcome.malformed.push(MalformedChange {
                        entity: change.entity,
                        entity_id: change.entity_id.clone(),
                        error,
                    });
                }
            }
        }

        Ok((outcome, touched))
    })
}

// ============================================================================
// Tests
// ============================================================================
