//! Migration error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::storage::StorageError;

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors that stop a migration. A backup taken before the failing step is
/// left in place.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("no schema versions given")]
    NoSchemas,

    /// None of the schema versions matches the store.
    #[error("no schema is compatible with store {0}")]
    NoCompatibleSchema(PathBuf),

    /// The backup directory or file could not be written.
    #[error("cannot back up store to {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot infer mapping from {source_version} to {destination_version}: {reason}")]
    CannotInferMapping {
        source_version: String,
        destination_version: String,
        reason: String,
    },

    #[error("invalid mapping file {path}: {reason}")]
    InvalidMapping { path: PathBuf, reason: String },

    /// A template store doesn't match the schema it was set up for.
    #[error("template store {0} is not compatible with its schema")]
    IncompatibleTemplate(PathBuf),
}

impl MigrationError {
    /// True for failures of the file system around the store.
    pub fn is_file_error(&self) -> bool {
        matches!(self, MigrationError::Backup { .. } | MigrationError::Io(_))
    }
}
