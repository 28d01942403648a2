use thiserror::Error;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Corrupt row {table}/{id}: failed to parse stored JSON")]
    Corruption {
        table: String,
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid campaign slug \"{0}\"")]
    InvalidCampaign(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error(
    "Schema migration from v{from_version} to v{to_version} \
     failed at step v{failed_at}"
)]
pub struct MigrationError {
    pub from_version: u32,
    pub to_version: u32,
    pub failed_at: u32,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sync scheduler disposed")]
    Disposed,

    #[error("No active sync subscription for campaign '{0}'")]
    UnknownCampaign(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// LoreDbError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoreDbError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `LoreDbError`.
pub type Result<T, E = LoreDbError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
