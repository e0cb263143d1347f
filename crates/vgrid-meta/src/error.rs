//! Error types for the vgrid metadata store.

use thiserror::Error;

/// Result type alias for metadata store operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Errors that can occur during metadata store operations.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("failed to open database: {0}")]
    Open(String),

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

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("lease {0} not found")]
    LeaseNotFound(i64),

    #[error("lock {0} is held by another owner")]
    LockHeld(String),

    #[error("internal lock poisoned")]
    Poisoned,
}
