//! lore-db — offline-first local store and sync engine for campaign notes.
//!
//! Every edit lands in SQLite immediately and appends to a durable change
//! log; a background engine pushes the log to the backend and pulls remote
//! changes, reconciling by last-write-wins timestamps. The app keeps
//! working with no network at all — sync just catches up later.

pub mod error;
pub mod types;

pub mod reactive;
pub mod store;
pub mod sync;

pub use error::{LoreDbError, MigrationError, Result, StoreError, SyncError};
pub use store::{CampaignStore, StoreOptions};
pub use sync::{
    SeedLoader, SeedOutcome, SyncEngine, SyncEngineOptions, SyncResult, SyncScheduler,
    SyncSchedulerOptions,
};
