//! Error types for the fleet store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during fleet store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open fleet database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("record encode error: {0}")]
    Encode(String),

    #[error("record decode error: {0}")]
    Decode(String),
}
