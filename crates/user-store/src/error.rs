use common::NotAnObject;
use thiserror::Error;

/// Errors that can occur when interacting with the user store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored document could not be turned into a record.
    #[error("Invalid document in row {row}: {source}")]
    InvalidDocument {
        row: i64,
        #[source]
        source: NotAnObject,
    },

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for user store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
