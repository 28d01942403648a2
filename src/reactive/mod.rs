//! Reactive layer — synchronous change notifications from the store.
//!
//! # Overview
//!
//! Every committed write (local mutation, applied remote change, seed load)
//! emits a [`StoreEvent`] naming the table touched, the affected record ids,
//! and the [`WriteSource`]. Consumers subscribe through
//! [`CampaignStore::events`](crate::store::CampaignStore::events); UI layers
//! typically re-query on `Remote` events and ignore `Local` ones they caused
//! themselves.
//!
//! # Modules
//!
//! - [`event_emitter`] — Generic typed pub/sub ([`EventEmitter<T>`]) with
//!   RAII [`Subscription`] guards.

pub mod event_emitter;

pub use event_emitter::{EventEmitter, ListenerFn, Subscription};

use crate::types::EntityKind;

/// Where a committed write originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    /// A user-driven mutation recorded into the change log.
    Local,
    /// A change applied from the backend during pull.
    Remote,
    /// A record written by the seed loader.
    Seed,
}

/// Notification for one committed write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Entity table that changed.
    pub table: EntityKind,
    /// Ids of the records touched, in write order.
    pub ids: Vec<String>,
    pub source: WriteSource,
}

/// Emitter type used by the store for change notifications.
pub type StoreEvents = EventEmitter<StoreEvent>;
