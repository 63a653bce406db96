//! Mapping models: how records of one schema version become records of the next.
//!
//! A mapping lists, per destination entity, where each attribute and
//! relationship takes its value from. Mappings are either written by hand
//! (JSON files collected in a [`MappingCatalog`]) or inferred from the two
//! schemas when the change between them is additive.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{Schema, SchemaError};
use crate::migration::error::{MigrationError, MigrationResult};
use crate::storage::{EntityName, ObjectId, Record, RelationshipValue};

/// File name suffix of hand-written mapping files.
pub const MAPPING_FILE_SUFFIX: &str = ".mapping.json";

/// Name of the backup directory created next to a migrated store.
pub const DEFAULT_BACKUP_DIR: &str = "Backup";

/// Where a destination attribute takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeSource {
    /// Copy the named source attribute.
    Copy(String),
    /// Always use this value.
    Constant(Value),
    /// Use the destination attribute's default, if any.
    Default,
}

/// Where a destination relationship takes its references from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSource {
    /// Copy the named source relationship.
    Copy(String),
    /// Start empty.
    Empty,
}

/// Mapping for one destination entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Source entity whose records are migrated, `None` for entities new in
    /// the destination schema.
    #[serde(default)]
    pub source: Option<EntityName>,
    pub destination: EntityName,
    /// Keyed by destination attribute; unlisted attributes use their default.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSource>,
    /// Keyed by destination relationship; unlisted relationships start empty.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipSource>,
}

/// Mapping from one schema version to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingModel {
    pub source_version: String,
    pub destination_version: String,
    pub entities: Vec<EntityMapping>,
    #[serde(skip)]
    inferred: bool,
}

impl MappingModel {
    /// Create an empty hand-written mapping.
    pub fn new(source_version: impl Into<String>, destination_version: impl Into<String>) -> Self {
        Self {
            source_version: source_version.into(),
            destination_version: destination_version.into(),
            entities: Vec::new(),
            inferred: false,
        }
    }

    /// Add an entity mapping.
    pub fn entity(mut self, mapping: EntityMapping) -> Self {
        self.entities.push(mapping);
        self
    }

    /// True if the mapping was inferred rather than written by hand.
    pub fn is_inferred(&self) -> bool {
        self.inferred
    }

    /// Infer a mapping between two schemas.
    ///
    /// Entities, attributes and relationships are matched by name. Inference
    /// fails when an attribute changes kind, or when an existing entity gains
    /// a required attribute without a default. Relationships whose
    /// destination changed start empty; entities missing from the
    /// destination are dropped with their records.
    pub fn infer(source: &Schema, destination: &Schema) -> MigrationResult<Self> {
        let fail = |reason: String| MigrationError::CannotInferMapping {
            source_version: source.version.clone(),
            destination_version: destination.version.clone(),
            reason,
        };

        let mut entities = Vec::with_capacity(destination.entities.len());
        for entity in &destination.entities {
            let origin = source.entity(entity.name.as_str());
            let mut mapping = EntityMapping {
                source: origin.map(|e| e.name.clone()),
                destination: entity.name.clone(),
                attributes: BTreeMap::new(),
                relationships: BTreeMap::new(),
            };

            for attribute in &entity.attributes {
                let previous = origin.and_then(|e| e.attribute(&attribute.name));
                let source = match previous {
                    Some(previous) if previous.kind != attribute.kind => {
                        return Err(fail(format!(
                            "{}.{} changed kind from {} to {}",
                            entity.name, attribute.name, previous.kind, attribute.kind
                        )));
                    }
                    Some(_) => AttributeSource::Copy(attribute.name.clone()),
                    None if origin.is_some()
                        && !attribute.optional
                        && attribute.default.is_none() =>
                    {
                        return Err(fail(format!(
                            "{}.{} is required and has no default",
                            entity.name, attribute.name
                        )));
                    }
                    None => AttributeSource::Default,
                };
                mapping.attributes.insert(attribute.name.clone(), source);
            }

            for relationship in &entity.relationships {
                let copied = origin
                    .and_then(|e| e.relationship(&relationship.name))
                    .is_some_and(|previous| previous.destination == relationship.destination);
                let source = if copied {
                    RelationshipSource::Copy(relationship.name.clone())
                } else {
                    RelationshipSource::Empty
                };
                mapping.relationships.insert(relationship.name.clone(), source);
            }

            entities.push(mapping);
        }

        Ok(Self {
            source_version: source.version.clone(),
            destination_version: destination.version.clone(),
            entities,
            inferred: true,
        })
    }

    /// Transform source records into records of the destination schema.
    ///
    /// Identifiers are kept. References are only carried over when they point
    /// to a record that survives the migration as the relationship's
    /// destination entity; a to-many value mapped onto a to-one relationship
    /// keeps its first surviving reference.
    pub fn transform(&self, records: &[Record], destination: &Schema) -> MigrationResult<Vec<Record>> {
        let by_source: HashMap<&EntityName, &EntityMapping> = self
            .entities
            .iter()
            .filter_map(|m| m.source.as_ref().map(|source| (source, m)))
            .collect();

        let survivors: HashMap<&ObjectId, &EntityName> = records
            .iter()
            .filter_map(|r| by_source.get(r.entity()).map(|m| (r.id(), &m.destination)))
            .collect();

        let mut migrated = Vec::with_capacity(survivors.len());
        for record in records {
            let Some(mapping) = by_source.get(record.entity()) else {
                continue;
            };
            let entity = destination
                .entity(mapping.destination.as_str())
                .ok_or_else(|| SchemaError::EntityNotFound(mapping.destination.to_string()))?;

            let mut target = Record::new(record.id().clone(), entity.name.clone());
            for attribute in &entity.attributes {
                let value = match mapping.attributes.get(&attribute.name) {
                    Some(AttributeSource::Copy(name)) => record.get(name).cloned(),
                    Some(AttributeSource::Constant(value)) => Some(value.clone()),
                    Some(AttributeSource::Default) | None => None,
                };
                if let Some(value) = value.or_else(|| attribute.default.clone()) {
                    target.set(attribute.name.clone(), value);
                }
            }

            for relationship in &entity.relationships {
                let ids: Vec<ObjectId> = match mapping.relationships.get(&relationship.name) {
                    Some(RelationshipSource::Copy(name)) => record
                        .related_ids(name)
                        .into_iter()
                        .filter(|id| survivors.get(id) == Some(&&relationship.destination))
                        .collect(),
                    Some(RelationshipSource::Empty) | None => Vec::new(),
                };
                let value = if relationship.to_many {
                    RelationshipValue::ToMany(ids)
                } else {
                    RelationshipValue::ToOne(ids.into_iter().next())
                };
                target.set_relationship(relationship.name.clone(), value);
            }

            migrated.push(target);
        }
        Ok(migrated)
    }

    /// Read a hand-written mapping from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> MigrationResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| MigrationError::InvalidMapping {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the mapping as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> MigrationResult<()> {
        let path = path.as_ref();
        let data = serde_json::to_vec_pretty(self).map_err(|e| MigrationError::InvalidMapping {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, data)?;
        Ok(())
    }
}

/// Hand-written mappings keyed by (source version, destination version).
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    mappings: BTreeMap<(String, String), MappingModel>,
}

impl MappingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, returning the one it replaces.
    pub fn add(&mut self, mapping: MappingModel) -> Option<MappingModel> {
        let key = (
            mapping.source_version.clone(),
            mapping.destination_version.clone(),
        );
        self.mappings.insert(key, mapping)
    }

    pub fn get(&self, source_version: &str, destination_version: &str) -> Option<&MappingModel> {
        self.mappings
            .get(&(source_version.to_string(), destination_version.to_string()))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Load every `*.mapping.json` file in a directory.
    pub fn load_dir(dir: impl AsRef<Path>) -> MigrationResult<Self> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_mapping = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(MAPPING_FILE_SUFFIX));
            if is_mapping {
                paths.push(path);
            }
        }
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            catalog.add(MappingModel::load(path)?);
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeKind, EntityBuilder, SchemaBuilder};
    use crate::fixtures::{schema_v1, schema_v2};
    use serde_json::json;
    use tempfile::TempDir;

    fn book(schema: &Schema, id: &str, title: &str) -> Record {
        let entity = schema.entity("Book").unwrap();
        let mut record = Record::new(ObjectId::new(id).unwrap(), entity.name.clone());
        for relationship in &entity.relationships {
            record.set_relationship(relationship.name.clone(), relationship.empty_value());
        }
        record.set("title", json!(title));
        record
    }

    #[test]
    fn test_infer_additive_change() {
        let mapping = MappingModel::infer(&schema_v1(), &schema_v2()).unwrap();
        assert!(mapping.is_inferred());
        assert_eq!(mapping.source_version, "1.0.0");
        assert_eq!(mapping.destination_version, "2.0.0");

        let books = mapping
            .entities
            .iter()
            .find(|m| m.destination == "Book")
            .unwrap();
        assert_eq!(books.source.as_ref().unwrap(), "Book");
        assert_eq!(
            books.attributes.get("title"),
            Some(&AttributeSource::Copy("title".into()))
        );
        assert_eq!(books.attributes.get("pages"), Some(&AttributeSource::Default));
        assert_eq!(books.relationships.get("author"), Some(&RelationshipSource::Empty));

        let authors = mapping
            .entities
            .iter()
            .find(|m| m.destination == "Author")
            .unwrap();
        assert!(authors.source.is_none());
    }

    #[test]
    fn test_infer_rejects_kind_change() {
        let changed = SchemaBuilder::new("2.0.0")
            .entity(EntityBuilder::new("Book").attribute("title", AttributeKind::Integer))
            .build()
            .unwrap();

        let err = MappingModel::infer(&schema_v1(), &changed).unwrap_err();
        assert!(matches!(err, MigrationError::CannotInferMapping { .. }));
        assert!(err.to_string().contains("Book.title changed kind"));
    }

    #[test]
    fn test_infer_rejects_required_attribute_without_default() {
        let stricter = SchemaBuilder::new("2.0.0")
            .entity(
                EntityBuilder::new("Book")
                    .attribute("title", AttributeKind::String)
                    .attribute("isbn", AttributeKind::String),
            )
            .build()
            .unwrap();

        let err = MappingModel::infer(&schema_v1(), &stricter).unwrap_err();
        assert!(err.to_string().contains("Book.isbn is required"));
    }

    #[test]
    fn test_transform_applies_defaults_and_keeps_ids() {
        let v1 = schema_v1();
        let v2 = schema_v2();
        let mut dune = book(&v1, "b1", "Dune");
        dune.set("year", json!(1965));

        let mapping = MappingModel::infer(&v1, &v2).unwrap();
        let migrated = mapping.transform(&[dune], &v2).unwrap();

        assert_eq!(migrated.len(), 1);
        let record = &migrated[0];
        assert_eq!(record.id().as_str(), "b1");
        assert_eq!(record.get_str("title"), Some("Dune"));
        assert_eq!(record.get_i64("year"), Some(1965));
        assert_eq!(record.get_i64("pages"), Some(0));
        assert_eq!(record.to_one("author"), None);
        v2.validate_record(record).unwrap();
    }

    #[test]
    fn test_transform_filters_dangling_and_converts_cardinality() {
        let source = SchemaBuilder::new("a")
            .entity(
                EntityBuilder::new("Shelf")
                    .attribute("label", AttributeKind::String)
                    .to_many("books", "Book", None),
            )
            .entity(EntityBuilder::new("Book").attribute("title", AttributeKind::String))
            .build()
            .unwrap();
        let destination = SchemaBuilder::new("b")
            .entity(
                EntityBuilder::new("Shelf")
                    .attribute("label", AttributeKind::String)
                    .to_one("books", "Book", None),
            )
            .entity(EntityBuilder::new("Book").attribute("title", AttributeKind::String))
            .build()
            .unwrap();

        let first = book(&source, "b1", "Dune");
        let mut shelf = Record::new(ObjectId::new("s1").unwrap(), "Shelf".parse().unwrap());
        shelf.set("label", json!("SF"));
        shelf.set_relationship(
            "books",
            RelationshipValue::ToMany(vec![
                ObjectId::new("gone").unwrap(),
                ObjectId::new("b1").unwrap(),
            ]),
        );

        let mapping = MappingModel::infer(&source, &destination).unwrap();
        let migrated = mapping.transform(&[shelf, first], &destination).unwrap();
        let shelf = migrated.iter().find(|r| r.entity() == "Shelf").unwrap();
        assert_eq!(shelf.to_one("books").map(ObjectId::as_str), Some("b1"));
    }

    #[test]
    fn test_explicit_mapping_and_catalog() {
        let v1 = schema_v1();
        let v2 = schema_v2();
        let mut attributes = BTreeMap::new();
        attributes.insert("title".to_string(), AttributeSource::Copy("title".into()));
        attributes.insert("pages".to_string(), AttributeSource::Constant(json!(100)));
        let mapping = MappingModel::new("1.0.0", "2.0.0").entity(EntityMapping {
            source: Some("Book".parse().unwrap()),
            destination: "Book".parse().unwrap(),
            attributes,
            relationships: BTreeMap::new(),
        });
        assert!(!mapping.is_inferred());

        let migrated = mapping.transform(&[book(&v1, "b1", "Dune")], &v2).unwrap();
        assert_eq!(migrated[0].get_i64("pages"), Some(100));
        // year is optional and unmapped
        assert_eq!(migrated[0].get("year"), None);

        let dir = TempDir::new().unwrap();
        mapping.save(dir.path().join("v1-v2.mapping.json")).unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let catalog = MappingCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        let loaded = catalog.get("1.0.0", "2.0.0").unwrap();
        assert_eq!(loaded, &mapping);
        assert!(catalog.get("2.0.0", "3.0.0").is_none());
    }

    #[test]
    fn test_invalid_mapping_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.mapping.json"), "not json").unwrap();

        let err = MappingCatalog::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMapping { .. }));
    }
}
