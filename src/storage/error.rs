//! Storage layer error types
//!
//! All errors that can occur while talking to the backing store are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::migration::MigrationError;
use crate::storage::types::{InvalidNameError, ObjectId};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying SQLite engine
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// the requested record was not found
    #[error("record not found: {0}")]
    RecordNotFound(ObjectId),

    /// the schema has no entity with this name
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// a record does not fit the schema
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// invalid entity name or identifier
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// data integrity check failed
    #[error("corrupted record {id}: {reason}")]
    CorruptedData { id: String, reason: String },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the file exists but carries no store metadata
    #[error("store not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the store was written with a different schema than the one it is opened with
    #[error("store at {path} is not compatible with schema {version}")]
    IncompatibleStore { path: PathBuf, version: String },

    /// the store did not exist and creating it was not allowed
    #[error("store not found: {0}")]
    StoreNotFound(PathBuf),

    /// opening an existing store required a migration and it failed
    #[error("migration failed: {0}")]
    Migration(#[source] Box<MigrationError>),

    /// configuration could not be used to open a store
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RecordNotFound(_)
                | StorageError::EntityNotFound(_)
                | StorageError::StoreNotFound(_)
        )
    }

    /// check if this error comes from a record that doesn't fit its entity
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, StorageError::Schema(_))
    }
}

impl From<MigrationError> for StorageError {
    fn from(err: MigrationError) -> Self {
        StorageError::Migration(Box::new(err))
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::RecordNotFound(ObjectId::new("abc").unwrap());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_schema_violation());

        let violation = StorageError::from(SchemaError::UndefinedAttribute {
            entity: "Book".to_string(),
            attribute: "isbn".to_string(),
        });
        assert!(!violation.is_not_found());
        assert!(violation.is_schema_violation());
    }
}
