//! Store set-up for migration tests.
//!
//! Creates one store file per schema version, either by copying a prepared
//! template or by creating it fresh and running the seed registered under
//! the store's name.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::Schema;
use crate::migration::error::{MigrationError, MigrationResult};
use crate::storage::{StorageResult, Store, StoreMetadata};

/// Extension of store files created here.
pub const STORE_EXTENSION: &str = "sqlite";

/// Seed data for a freshly created store.
pub trait SeedData: Send + Sync {
    /// Adjust the schema before the store is created.
    fn prepare_schema(&self, schema: Schema) -> Schema {
        schema
    }

    /// Populate the new store.
    fn seed(&self, store: &Store) -> StorageResult<()>;
}

/// Seeds keyed by store name.
#[derive(Default)]
pub struct SeedRegistry {
    seeds: HashMap<String, Box<dyn SeedData>>,
}

impl SeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, seed: impl SeedData + 'static) {
        self.seeds.insert(name.into(), Box::new(seed));
    }

    pub fn get(&self, name: &str) -> Option<&dyn SeedData> {
        self.seeds.get(name).map(|seed| seed.as_ref())
    }
}

impl fmt::Debug for SeedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.seeds.keys()).finish()
    }
}

/// Set up `<dir>/<name>.sqlite` for `schema`, replacing any existing file.
///
/// If `template` holds a file of the same name it is copied and must be
/// compatible with the schema. Otherwise the store is created, with the
/// schema and contents given by the seed registered under `name`, if any.
pub fn setup_store(
    dir: impl AsRef<Path>,
    name: &str,
    schema: &Schema,
    template: Option<&Path>,
    seeds: &SeedRegistry,
) -> MigrationResult<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let file_name = format!("{name}.{STORE_EXTENSION}");
    let path = dir.join(&file_name);
    if path.exists() {
        fs::remove_file(&path)?;
    }

    if let Some(source) = template.map(|t| t.join(&file_name)).filter(|s| s.exists()) {
        fs::copy(&source, &path)?;
        if !schema.is_compatible(&StoreMetadata::read(&path)?) {
            fs::remove_file(&path)?;
            return Err(MigrationError::IncompatibleTemplate(source));
        }
        debug!(path = %path.display(), template = %source.display(), "copied template store");
        return Ok(path);
    }

    let seed = seeds.get(name);
    let schema = match seed {
        Some(seed) => seed.prepare_schema(schema.clone()),
        None => schema.clone(),
    };
    let store = Store::create(&path, &schema)?;
    if let Some(seed) = seed {
        seed.seed(&store)?;
    }
    debug!(path = %path.display(), seeded = seed.is_some(), "set up store");
    Ok(path)
}

/// Set up one store per schema version, each named after its version.
pub fn setup_stores(
    dir: impl AsRef<Path>,
    schemas: &[Schema],
    template: Option<&Path>,
    seeds: &SeedRegistry,
) -> MigrationResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    schemas
        .iter()
        .map(|schema| setup_store(dir, &schema.version, schema, template, seeds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::fixtures::{schema_v1, schema_v2, schema_v3};
    use crate::migration::Migration;
    use crate::storage::EntityName;
    use serde_json::json;
    use tempfile::TempDir;

    struct Books(Vec<&'static str>);

    impl SeedData for Books {
        fn seed(&self, store: &Store) -> StorageResult<()> {
            let context = Context::new(store);
            let entity: EntityName = "Book".parse()?;
            for title in &self.0 {
                let mut record = context.insert(&entity)?;
                record.set("title", json!(title));
                context.update(record)?;
            }
            context.commit()?;
            Ok(())
        }
    }

    struct Renamed;

    impl SeedData for Renamed {
        fn prepare_schema(&self, mut schema: Schema) -> Schema {
            schema.version = format!("{}-custom", schema.version);
            schema
        }

        fn seed(&self, _store: &Store) -> StorageResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_setup_store_with_seed() {
        let dir = TempDir::new().unwrap();
        let mut seeds = SeedRegistry::new();
        seeds.register("1.0.0", Books(vec!["Dune", "Emma"]));

        let path = setup_store(dir.path(), "1.0.0", &schema_v1(), None, &seeds).unwrap();
        assert_eq!(path, dir.path().join("1.0.0.sqlite"));

        let store = Store::open_file(&path, &schema_v1()).unwrap();
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_setup_store_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let mut seeds = SeedRegistry::new();
        seeds.register("library", Books(vec!["Dune"]));
        setup_store(dir.path(), "library", &schema_v1(), None, &seeds).unwrap();

        let path = setup_store(dir.path(), "library", &schema_v1(), None, &SeedRegistry::new()).unwrap();
        let store = Store::open_file(&path, &schema_v1()).unwrap();
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_prepare_schema_changes_written_version() {
        let dir = TempDir::new().unwrap();
        let mut seeds = SeedRegistry::new();
        seeds.register("odd", Renamed);

        let path = setup_store(dir.path(), "odd", &schema_v1(), None, &seeds).unwrap();
        let metadata = StoreMetadata::read(&path).unwrap();
        assert_eq!(metadata.version, "1.0.0-custom");
    }

    #[test]
    fn test_template_copy_and_compatibility() {
        let templates = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let seeds = SeedRegistry::new();
        setup_store(templates.path(), "library", &schema_v2(), None, &seeds).unwrap();

        let path = setup_store(dir.path(), "library", &schema_v2(), Some(templates.path()), &seeds)
            .unwrap();
        assert!(schema_v2().is_compatible(&StoreMetadata::read(&path).unwrap()));

        let err = setup_store(dir.path(), "library", &schema_v3(), Some(templates.path()), &seeds)
            .unwrap_err();
        assert!(matches!(err, MigrationError::IncompatibleTemplate(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_setup_stores_then_migrate_each() {
        let dir = TempDir::new().unwrap();
        let schemas = vec![schema_v1(), schema_v2(), schema_v3()];
        let mut seeds = SeedRegistry::new();
        seeds.register("1.0.0", Books(vec!["Dune"]));

        let paths = setup_stores(dir.path(), &schemas, None, &seeds).unwrap();
        assert_eq!(paths.len(), 3);

        for path in &paths {
            let schema = Migration::new(path, schemas.clone()).migrate().unwrap();
            assert_eq!(schema.version, "3.0.0");
        }
        let store = Store::open_file(&paths[0], &schema_v3()).unwrap();
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 1);
    }
}
