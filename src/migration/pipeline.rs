//! Progressive store migration.
//!
//! The pipeline finds the newest schema version a store is compatible with,
//! backs the store up and then migrates it one version at a time:
//!
//! ```text
//! store ──▶ detect version ──▶ backup ──▶ v(n)→v(n+1) ──▶ ... ──▶ latest
//!                                         │
//!                                         ├─ mapping (explicit or inferred)
//!                                         ├─ migrate into a temp dir
//!                                         └─ replace the store file
//! ```
//!
//! A failed step stops the pipeline. The store keeps the last version that
//! was fully written, and the backup stays in place for recovery.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info};

use crate::catalog::Schema;
use crate::migration::error::{MigrationError, MigrationResult};
use crate::migration::mapping::{MappingCatalog, MappingModel, DEFAULT_BACKUP_DIR};
use crate::storage::{Store, StoreMetadata};

const TEMP_PREFIX: &str = ".migration";

/// One applied migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub from: String,
    pub to: String,
    /// The mapping was inferred rather than taken from the catalog.
    pub inferred: bool,
}

/// Outcome of a migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// The schema the store is now compatible with.
    pub schema: Schema,
    /// Backup taken before the first step, `None` if nothing was migrated.
    pub backup: Option<PathBuf>,
    /// Applied steps, in order.
    pub steps: Vec<MigrationStep>,
}

impl MigrationReport {
    pub fn migrated(&self) -> bool {
        !self.steps.is_empty()
    }
}

/// A migration of one store file to the latest of a list of schema versions.
#[derive(Debug, Clone)]
pub struct Migration {
    path: PathBuf,
    schemas: Vec<Schema>,
    mappings: MappingCatalog,
    backup_dir: String,
}

impl Migration {
    /// Create a migration for the store at `path`. `schemas` are ordered
    /// oldest first.
    pub fn new(path: impl AsRef<Path>, schemas: Vec<Schema>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schemas,
            mappings: MappingCatalog::default(),
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
        }
    }

    /// Use hand-written mappings where available.
    pub fn mappings(mut self, mappings: MappingCatalog) -> Self {
        self.mappings = mappings;
        self
    }

    /// Name of the backup directory, created next to the store.
    pub fn backup_dir(mut self, name: impl Into<String>) -> Self {
        self.backup_dir = name.into();
        self
    }

    /// Migrate and return the schema the store ends up compatible with.
    pub fn migrate(&self) -> MigrationResult<Schema> {
        Ok(self.migrate_with_report()?.schema)
    }

    /// Migrate and report the backup and the applied steps.
    pub fn migrate_with_report(&self) -> MigrationResult<MigrationReport> {
        if self.schemas.is_empty() {
            return Err(MigrationError::NoSchemas);
        }

        // newest first, so a store that also matches an older version is not
        // migrated again from there
        let metadata = StoreMetadata::read(&self.path)?;
        let current = self
            .schemas
            .iter()
            .rposition(|schema| schema.is_compatible(&metadata))
            .ok_or_else(|| MigrationError::NoCompatibleSchema(self.path.clone()))?;

        let latest = self.schemas.len() - 1;
        if current == latest {
            debug!(path = %self.path.display(), version = %metadata.version, "store is up to date");
            return Ok(MigrationReport {
                schema: self.schemas[latest].clone(),
                backup: None,
                steps: Vec::new(),
            });
        }

        let backup = self.backup()?;

        let mut steps = Vec::with_capacity(latest - current);
        for pair in self.schemas[current..].windows(2) {
            steps.push(self.step(&pair[0], &pair[1])?);
        }

        Ok(MigrationReport {
            schema: self.schemas[latest].clone(),
            backup: Some(backup),
            steps,
        })
    }

    fn parent(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Copy the store to `<backup dir>/<stem> - <timestamp>.<ext>`. An existing
    /// backup is never replaced; a taken name gets a ` (n)` suffix.
    fn backup(&self) -> MigrationResult<PathBuf> {
        let dir = self.parent().join(&self.backup_dir);
        fs::create_dir_all(&dir).map_err(|source| MigrationError::Backup {
            path: dir.clone(),
            source,
        })?;

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self.path.extension().map(|e| e.to_string_lossy().into_owned());
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();

        let mut attempt = 0usize;
        let (mut target, backup) = loop {
            let suffix = match attempt {
                0 => String::new(),
                n => format!(" ({n})"),
            };
            let name = match &ext {
                Some(ext) => format!("{stem} - {stamp}{suffix}.{ext}"),
                None => format!("{stem} - {stamp}{suffix}"),
            };
            let candidate = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(file) => break (file, candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(MigrationError::Backup { path: candidate, source }),
            }
        };

        let copied = File::open(&self.path)
            .and_then(|mut source| io::copy(&mut source, &mut target))
            .and_then(|_| target.sync_all());
        if let Err(source) = copied {
            drop(target);
            if let Err(err) = fs::remove_file(&backup) {
                debug!(backup = %backup.display(), error = %err, "cannot remove partial backup");
            }
            return Err(MigrationError::Backup { path: backup, source });
        }
        info!(path = %self.path.display(), backup = %backup.display(), "backed up store");
        Ok(backup)
    }

    fn mapping_for(&self, source: &Schema, destination: &Schema) -> MigrationResult<MappingModel> {
        match self.mappings.get(&source.version, &destination.version) {
            Some(mapping) => Ok(mapping.clone()),
            None => MappingModel::infer(source, destination),
        }
    }

    fn step(&self, source: &Schema, destination: &Schema) -> MigrationResult<MigrationStep> {
        let mapping = self.mapping_for(source, destination)?;

        let records = Store::open_file(&self.path, source)?.all_records()?;
        let migrated = mapping.transform(&records, destination)?;

        let file_name = self.path.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "store path has no file name")
        })?;
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(self.parent())?;
        let target = tmp.path().join(file_name);
        Store::create(&target, destination)?.import(&migrated)?;

        fs::rename(&target, &self.path)?;
        tmp.close()?;

        info!(
            path = %self.path.display(),
            from = %source.version,
            to = %destination.version,
            records = migrated.len(),
            inferred = mapping.is_inferred(),
            "migrated store"
        );
        Ok(MigrationStep {
            from: source.version.clone(),
            to: destination.version.clone(),
            inferred: mapping.is_inferred(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeKind, EntityBuilder, SchemaBuilder};
    use crate::fixtures::{schema_v1, schema_v2, schema_v3};
    use crate::migration::mapping::{AttributeSource, EntityMapping};
    use crate::storage::{ContextId, ChangeSet, ObjectId, Record, RelationshipValue};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn v1_store(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("Library.sqlite");
        let v1 = schema_v1();
        let store = Store::create(&path, &v1).unwrap();
        let mut dune = Record::new(ObjectId::new("b1").unwrap(), "Book".parse().unwrap());
        dune.set("title", json!("Dune"));
        dune.set("year", json!(1965));
        store
            .commit(
                ChangeSet {
                    inserted: vec![dune],
                    ..ChangeSet::default()
                },
                ContextId(0),
            )
            .unwrap();
        path
    }

    fn backups(dir: &TempDir) -> Vec<PathBuf> {
        let backup_dir = dir.path().join(DEFAULT_BACKUP_DIR);
        if !backup_dir.exists() {
            return Vec::new();
        }
        fs::read_dir(backup_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_migrates_version_by_version() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);

        let report = Migration::new(&path, vec![schema_v1(), schema_v2(), schema_v3()])
            .migrate_with_report()
            .unwrap();

        assert_eq!(report.schema.version, "3.0.0");
        assert_eq!(
            report.steps,
            vec![
                MigrationStep { from: "1.0.0".into(), to: "2.0.0".into(), inferred: true },
                MigrationStep { from: "2.0.0".into(), to: "3.0.0".into(), inferred: true },
            ]
        );

        let metadata = StoreMetadata::read(&path).unwrap();
        assert!(schema_v3().is_compatible(&metadata));
        assert!(!schema_v1().is_compatible(&metadata));

        let backup = report.backup.unwrap();
        assert!(backup.exists());
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Library - "));
        assert!(name.ends_with(".sqlite"));
        assert!(schema_v1().is_compatible(&StoreMetadata::read(&backup).unwrap()));

        let store = Store::open_file(&path, &schema_v3()).unwrap();
        let record = store.record(&ObjectId::new("b1").unwrap()).unwrap().unwrap();
        assert_eq!(record.get_str("title"), Some("Dune"));
        assert_eq!(record.get_i64("pages"), Some(0));
        assert_eq!(record.to_one("author"), None);

        // no temp directories left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_migration_starts_from_detected_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Library.sqlite");
        Store::create(&path, &schema_v2()).unwrap();

        let report = Migration::new(&path, vec![schema_v1(), schema_v2(), schema_v3()])
            .migrate_with_report()
            .unwrap();
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].from, "2.0.0");
    }

    #[test]
    fn test_up_to_date_store_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Library.sqlite");
        Store::create(&path, &schema_v2()).unwrap();

        let report = Migration::new(&path, vec![schema_v1(), schema_v2()])
            .migrate_with_report()
            .unwrap();
        assert!(!report.migrated());
        assert!(report.backup.is_none());
        assert!(backups(&dir).is_empty());
    }

    #[test]
    fn test_no_compatible_schema() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);

        let err = Migration::new(&path, vec![schema_v2(), schema_v3()])
            .migrate()
            .unwrap_err();
        assert!(matches!(err, MigrationError::NoCompatibleSchema(_)));

        let err = Migration::new(&path, Vec::new()).migrate().unwrap_err();
        assert!(matches!(err, MigrationError::NoSchemas));
    }

    #[test]
    fn test_explicit_mapping_is_preferred() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);

        let mut attributes = BTreeMap::new();
        attributes.insert("title".to_string(), AttributeSource::Copy("title".into()));
        attributes.insert("pages".to_string(), AttributeSource::Constant(json!(412)));
        let mut mappings = MappingCatalog::new();
        mappings.add(MappingModel::new("1.0.0", "2.0.0").entity(EntityMapping {
            source: Some("Book".parse().unwrap()),
            destination: "Book".parse().unwrap(),
            attributes,
            relationships: BTreeMap::new(),
        }));

        let report = Migration::new(&path, vec![schema_v1(), schema_v2()])
            .mappings(mappings)
            .backup_dir("Snapshots")
            .migrate_with_report()
            .unwrap();
        assert!(!report.steps[0].inferred);
        assert!(report.backup.unwrap().starts_with(dir.path().join("Snapshots")));

        let store = Store::open_file(&path, &schema_v2()).unwrap();
        let record = store.record(&ObjectId::new("b1").unwrap()).unwrap().unwrap();
        assert_eq!(record.get_i64("pages"), Some(412));
        assert_eq!(record.get("year"), None);
        assert_eq!(
            record.relationship("author"),
            Some(&RelationshipValue::ToOne(None))
        );
    }

    #[test]
    fn test_failed_step_keeps_store_and_backup() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);
        let broken = SchemaBuilder::new("2.0.0")
            .entity(EntityBuilder::new("Book").attribute("title", AttributeKind::Integer))
            .build()
            .unwrap();

        let err = Migration::new(&path, vec![schema_v1(), broken])
            .migrate()
            .unwrap_err();
        assert!(matches!(err, MigrationError::CannotInferMapping { .. }));

        assert!(schema_v1().is_compatible(&StoreMetadata::read(&path).unwrap()));
        assert_eq!(backups(&dir).len(), 1);
    }

    #[test]
    fn test_backup_dir_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);
        // a file where the backup directory should go
        fs::write(dir.path().join(DEFAULT_BACKUP_DIR), "").unwrap();

        let err = Migration::new(&path, vec![schema_v1(), schema_v2()])
            .migrate()
            .unwrap_err();
        assert!(err.is_file_error());
        assert!(schema_v1().is_compatible(&StoreMetadata::read(&path).unwrap()));
    }

    #[test]
    fn test_backups_taken_back_to_back_are_distinct() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);
        let migration = Migration::new(&path, vec![schema_v1(), schema_v2()]);

        let first = migration.backup().unwrap();
        let second = migration.backup().unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
        assert_eq!(backups(&dir).len(), 2);
    }

    #[test]
    fn test_retry_keeps_earlier_backup() {
        let dir = TempDir::new().unwrap();
        let path = v1_store(&dir);
        let broken = SchemaBuilder::new("3.0.0")
            .entity(EntityBuilder::new("Book").attribute("title", AttributeKind::Integer))
            .build()
            .unwrap();
        let migration = Migration::new(&path, vec![schema_v1(), schema_v2(), broken]);

        // the first step lands, the second fails; retrying starts from 2.0.0
        assert!(migration.migrate().is_err());
        assert!(schema_v2().is_compatible(&StoreMetadata::read(&path).unwrap()));
        assert!(migration.migrate().is_err());

        let taken = backups(&dir);
        assert_eq!(taken.len(), 2);
        let versions: Vec<String> = taken
            .iter()
            .map(|backup| StoreMetadata::read(backup).unwrap().version)
            .collect();
        assert!(versions.contains(&"1.0.0".to_string()));
        assert!(versions.contains(&"2.0.0".to_string()));
    }
}
