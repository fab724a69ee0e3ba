//! Error types for the hours ledger engine

use thiserror::Error;

/// Result type for record store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure of a single read or write against the record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite operation error (wraps rusqlite::Error)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Failure reported by a remote or injected backend
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort a whole engine operation
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("meeting {0} not found")]
    MeetingNotFound(String),

    #[error("cannot merge meeting {0} into itself")]
    SameMeeting(String),

    #[error("member {0} not found")]
    MemberNotFound(String),

    #[error("cannot merge member {0} into itself")]
    SameMember(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
