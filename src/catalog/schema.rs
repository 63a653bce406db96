//! Schema definitions, validation and store compatibility.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{AttributeDescription, AttributeKind, RelationshipDescription};
use crate::storage::{EntityName, InvalidNameError, Record, StoreMetadata};

/// File suffix used by [`Schema::load_dir`].
pub const SCHEMA_FILE_SUFFIX: &str = ".schema.json";

/// A record type: its attributes and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    /// Entity name.
    pub name: EntityName,
    /// Scalar properties.
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    /// References to other entities.
    #[serde(default)]
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    pub fn new(name: EntityName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Get an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Get a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Validate a record against this entity.
    pub fn validate_record(&self, record: &Record) -> Result<(), SchemaError> {
        if record.entity() != &self.name {
            return Err(SchemaError::EntityMismatch {
                expected: self.name.to_string(),
                found: record.entity().to_string(),
            });
        }

        for name in record.attributes().keys() {
            if self.attribute(name).is_none() {
                return Err(SchemaError::UndefinedAttribute {
                    entity: self.name.to_string(),
                    attribute: name.clone(),
                });
            }
        }

        for attribute in &self.attributes {
            attribute
                .validate(record.get(&attribute.name))
                .map_err(|reason| SchemaError::InvalidValue {
                    entity: self.name.to_string(),
                    attribute: attribute.name.clone(),
                    reason,
                })?;
        }

        for (name, value) in record.relationships() {
            let relationship =
                self.relationship(name)
                    .ok_or_else(|| SchemaError::UndefinedRelationship {
                        entity: self.name.to_string(),
                        relationship: name.clone(),
                    })?;
            if !relationship.accepts(value) {
                return Err(SchemaError::CardinalityMismatch {
                    entity: self.name.to_string(),
                    relationship: name.clone(),
                });
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        let names = self
            .attributes
            .iter()
            .map(|a| &a.name)
            .chain(self.relationships.iter().map(|r| &r.name));
        for name in names {
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateProperty {
                    entity: self.name.to_string(),
                    property: name.clone(),
                });
            }
        }

        for attribute in &self.attributes {
            if let Some(default) = &attribute.default {
                if !attribute.kind.matches(default) {
                    return Err(SchemaError::InvalidValue {
                        entity: self.name.to_string(),
                        attribute: attribute.name.clone(),
                        reason: format!("default {} is not a valid {}", default, attribute.kind),
                    });
                }
            }
        }

        Ok(())
    }
}

/// One version of the object model.
///
/// The version label is informational: two schemas with the same entities,
/// attributes and relationships share a fingerprint and are interchangeable
/// as far as a store is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Version label, e.g. `1.2.0`.
    pub version: String,
    /// Entity definitions.
    pub entities: Vec<EntityDescription>,
}

impl Schema {
    /// Create a schema, validating it.
    pub fn new(
        version: impl Into<String>,
        entities: Vec<EntityDescription>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            version: version.into(),
            entities,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Get an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Get entity names.
    pub fn entity_names(&self) -> Vec<&EntityName> {
        self.entities.iter().map(|e| &e.name).collect()
    }

    /// Validate the schema itself: unique names, known relationship
    /// destinations and matching inverses.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(&entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name.to_string()));
            }
            entity.validate()?;
        }

        for entity in &self.entities {
            for relationship in &entity.relationships {
                let destination = self.entity(relationship.destination.as_str()).ok_or_else(|| {
                    SchemaError::UnknownDestination {
                        entity: entity.name.to_string(),
                        relationship: relationship.name.clone(),
                        destination: relationship.destination.to_string(),
                    }
                })?;

                let Some(inverse_name) = &relationship.inverse else {
                    continue;
                };
                let valid = destination.relationship(inverse_name).is_some_and(|inverse| {
                    inverse.destination == entity.name
                        && inverse.inverse.as_deref().map_or(true, |n| n == relationship.name)
                });
                if !valid {
                    return Err(SchemaError::InvalidInverse {
                        entity: entity.name.to_string(),
                        relationship: relationship.name.clone(),
                        inverse: inverse_name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate a record against the entity it names.
    pub fn validate_record(&self, record: &Record) -> Result<(), SchemaError> {
        self.entity(record.entity().as_str())
            .ok_or_else(|| SchemaError::EntityNotFound(record.entity().to_string()))?
            .validate_record(record)
    }

    /// Structural hash of the schema.
    ///
    /// Covers entity names, attribute names, kinds and optionality, and
    /// relationship names, destinations, cardinality and inverses. Defaults
    /// and the version label are not part of it.
    pub fn fingerprint(&self) -> String {
        let mut entities: Vec<&EntityDescription> = self.entities.iter().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = blake3::Hasher::new();
        for entity in entities {
            hash_field(&mut hasher, "entity", entity.name.as_str());

            let mut attributes: Vec<&AttributeDescription> = entity.attributes.iter().collect();
            attributes.sort_by(|a, b| a.name.cmp(&b.name));
            for attribute in attributes {
                let line = format!("{}:{}:{}", attribute.name, attribute.kind, attribute.optional);
                hash_field(&mut hasher, "attribute", &line);
            }

            let mut relationships: Vec<&RelationshipDescription> =
                entity.relationships.iter().collect();
            relationships.sort_by(|a, b| a.name.cmp(&b.name));
            for relationship in relationships {
                let line = format!(
                    "{}:{}:{}:{}",
                    relationship.name,
                    relationship.destination,
                    relationship.to_many,
                    relationship.inverse.as_deref().unwrap_or("")
                );
                hash_field(&mut hasher, "relationship", &line);
            }
        }

        hasher.finalize().to_hex().to_string()
    }

    /// Check if a store written with some schema can be opened with this one.
    pub fn is_compatible(&self, metadata: &StoreMetadata) -> bool {
        metadata.fingerprint == self.fingerprint()
    }

    /// Read a schema from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| SchemaError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let schema: Schema = serde_json::from_slice(&data).map_err(|e| SchemaError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        schema.validate()?;
        Ok(schema)
    }

    /// Write the schema as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SchemaError> {
        let path = path.as_ref();
        let data = serde_json::to_vec_pretty(self).map_err(|e| SchemaError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, data).map_err(|e| SchemaError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load every `*.schema.json` file in a directory, ordered by file name.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>, SchemaError> {
        let dir = dir.as_ref();
        let io_error = |e: std::io::Error| SchemaError::Io {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_schema = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SCHEMA_FILE_SUFFIX));
            if is_schema {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(Self::load).collect()
    }
}

fn hash_field(hasher: &mut blake3::Hasher, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(value.as_bytes());
    hasher.update(&[0x1e]);
}

/// Schema-related errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("duplicate property {property} on entity {entity}")]
    DuplicateProperty { entity: String, property: String },

    #[error("relationship {entity}.{relationship} points to unknown entity {destination}")]
    UnknownDestination {
        entity: String,
        relationship: String,
        destination: String,
    },

    #[error("relationship {entity}.{relationship} has invalid inverse {inverse}")]
    InvalidInverse {
        entity: String,
        relationship: String,
        inverse: String,
    },

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("record belongs to {found}, expected {expected}")]
    EntityMismatch { expected: String, found: String },

    #[error("undefined attribute: entity={entity}, attribute={attribute}")]
    UndefinedAttribute { entity: String, attribute: String },

    #[error("undefined relationship: entity={entity}, relationship={relationship}")]
    UndefinedRelationship { entity: String, relationship: String },

    #[error("relationship {entity}.{relationship} holds a value of the wrong cardinality")]
    CardinalityMismatch { entity: String, relationship: String },

    #[error("invalid value for {entity}.{attribute}: {reason}")]
    InvalidValue {
        entity: String,
        attribute: String,
        reason: String,
    },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("cannot read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

struct PendingRelationship {
    name: String,
    destination: String,
    to_many: bool,
    inverse: Option<String>,
}

/// Builder for a single entity, used with [`SchemaBuilder`].
pub struct EntityBuilder {
    name: String,
    attributes: Vec<AttributeDescription>,
    relationships: Vec<PendingRelationship>,
}

impl EntityBuilder {
    /// Start building an entity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Add a required attribute.
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDescription::new(name, kind));
        self
    }

    /// Add an optional attribute.
    pub fn optional_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes
            .push(AttributeDescription::new(name, kind).optional());
        self
    }

    /// Add a required attribute with a default value.
    pub fn attribute_with_default(
        mut self,
        name: impl Into<String>,
        kind: AttributeKind,
        default: Value,
    ) -> Self {
        self.attributes
            .push(AttributeDescription::new(name, kind).with_default(default));
        self
    }

    /// Add a fully described attribute.
    pub fn describe(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a to-one relationship.
    pub fn to_one(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.relationships.push(PendingRelationship {
            name: name.into(),
            destination: destination.into(),
            to_many: false,
            inverse: inverse.map(str::to_string),
        });
        self
    }

    /// Add a to-many relationship.
    pub fn to_many(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.relationships.push(PendingRelationship {
            name: name.into(),
            destination: destination.into(),
            to_many: true,
            inverse: inverse.map(str::to_string),
        });
        self
    }

    /// Build the entity description.
    pub fn build(self) -> Result<EntityDescription, SchemaError> {
        let mut entity = EntityDescription::new(EntityName::new(self.name)?);
        entity.attributes = self.attributes;
        for pending in self.relationships {
            entity.relationships.push(RelationshipDescription {
                name: pending.name,
                destination: EntityName::new(pending.destination)?,
                to_many: pending.to_many,
                inverse: pending.inverse,
            });
        }
        entity.validate()?;
        Ok(entity)
    }
}

/// Builder for creating schemas.
pub struct SchemaBuilder {
    version: String,
    entities: Vec<EntityBuilder>,
}

impl SchemaBuilder {
    /// Start building a schema with a version label.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            entities: Vec::new(),
        }
    }

    /// Add an entity.
    pub fn entity(mut self, entity: EntityBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    /// Build the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let entities = self
            .entities
            .into_iter()
            .map(EntityBuilder::build)
            .collect::<Result<Vec<_>, _>>()?;
        Schema::new(self.version, entities)
    }
}
