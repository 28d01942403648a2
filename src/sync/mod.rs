//! Background synchronization: push/pull engine, cadence scheduling, and
//! first-run seeding.
//!
//! # Overview
//!
//! - [`engine`] — [`SyncEngine`]: one push+pull cycle over a store and a
//!   transport; never throws, collects errors in [`SyncResult`].
//! - [`scheduler`] — [`SyncScheduler`]: process-wide timer loops keyed by
//!   campaign, reference-counted subscriptions, coalesced explicit
//!   triggers.
//! - [`seed`] — [`SeedLoader`]: bootstrap an empty store from the backend
//!   snapshot.
//! - [`http`] — [`HttpTransport`]: the stock [`SyncTransport`] over
//!   reqwest.
//! - [`activity`] — [`ActivityTracker`]: recent-edit signal driving
//!   adaptive cadence.

pub mod activity;
pub mod engine;
pub mod http;
pub mod scheduler;
pub mod seed;
pub mod types;

pub use activity::ActivityTracker;
pub use engine::{SyncEngine, DEFAULT_PUSH_BATCH_SIZE};
pub use http::{HttpTransport, HttpTransportOptions, StaticTokenProvider, TokenProvider};
pub use scheduler::{SyncCadence, SyncHandle, SyncScheduler, SyncSchedulerOptions};
pub use seed::{SeedLoader, SeedOutcome};
pub use types::{
    ChangeUpload, PullBatch, PushOutcome, SyncEngineOptions, SyncErrorCallback, SyncErrorEvent,
    SyncErrorKind, SyncPhase, SyncResult, SyncStore, SyncTransport, SyncTransportError,
};
