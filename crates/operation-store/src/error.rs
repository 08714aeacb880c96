use thiserror::Error;

use crate::{OperationId, Version};

/// Errors that can occur when interacting with an operation repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The operation does not exist.
    #[error("Operation not found: {0}")]
    NotFound(OperationId),

    /// An operation with this id already exists.
    /// Ids are generator-assigned, so this indicates a bug in the adapter.
    #[error("Duplicate operation id: {0}")]
    Duplicate(OperationId),

    /// The row changed since it was loaded.
    /// The version presented by the writer did not match the stored version.
    #[error(
        "Concurrent modification of operation {operation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        operation_id: OperationId,
        expected: Version,
        actual: Version,
    },

    /// The backing store could not be reached.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into an operation.
    #[error("Corrupt operation row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl RepositoryError {
    /// Returns true for an optimistic-concurrency conflict.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, RepositoryError::ConcurrentModification { .. })
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
