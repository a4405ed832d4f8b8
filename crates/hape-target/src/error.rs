//! Error types for the hape target store.

use thiserror::Error;

/// Result type alias for target store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during target store operations.
///
/// Reads never surface these: an unreadable document is "no target".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),

    /// Another process holds the redb file. redb allows a single process.
    #[error("store {0} is held by another process")]
    Locked(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("revision conflict on {key}: expected {expected:?}, found {current:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        current: Option<u64>,
    },
}
