//! Catalog module for schema management.
//!
//! A [`Schema`] describes one version of the object model: its entities, their
//! attributes and the relationships between them. Stores remember the
//! fingerprint of the schema they were written with, which is what the
//! migration pipeline uses to find out which version a store file is at.
//! The [`Registry`] maps application model types to entities.

mod registry;
mod schema;
mod types;

pub use registry::Registry;
pub use schema::{
    EntityBuilder, EntityDescription, Schema, SchemaBuilder, SchemaError, SCHEMA_FILE_SUFFIX,
};
pub use types::{AttributeDescription, AttributeKind, RelationshipDescription};
