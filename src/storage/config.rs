//! Store configuration options.

use std::path::PathBuf;

use crate::catalog::Schema;
use crate::migration::{MappingCatalog, DEFAULT_BACKUP_DIR};

/// Options for [`Store::open`](crate::storage::Store::open).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the store file.
    pub path: PathBuf,
    /// All schema versions, oldest first. The last one is the current schema.
    pub schemas: Vec<Schema>,
    /// Create the store if the file doesn't exist.
    pub create_if_missing: bool,
    /// Remove and recreate the store when it cannot be migrated.
    pub reset_on_incompatible: bool,
    /// Hand-written mappings used instead of inferred ones.
    pub mappings: MappingCatalog,
    /// Name of the backup directory created next to the store.
    pub backup_dir: String,
}

impl StoreConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schemas: Vec::new(),
            create_if_missing: true,
            reset_on_incompatible: false,
            mappings: MappingCatalog::default(),
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
        }
    }

    /// Set the schema versions, oldest first.
    pub fn schemas(mut self, schemas: Vec<Schema>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Use a single schema version.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schemas = vec![schema];
        self
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set reset_on_incompatible flag.
    pub fn reset_on_incompatible(mut self, value: bool) -> Self {
        self.reset_on_incompatible = value;
        self
    }

    /// Set the explicit mapping models.
    pub fn mappings(mut self, mappings: MappingCatalog) -> Self {
        self.mappings = mappings;
        self
    }

    /// Set the backup directory name.
    pub fn backup_dir(mut self, name: impl Into<String>) -> Self {
        self.backup_dir = name.into();
        self
    }

    /// The schema new stores are created with.
    pub fn latest_schema(&self) -> Option<&Schema> {
        self.schemas.last()
    }
}
