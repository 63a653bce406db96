//! Schema migration for store files.
//!
//! Every store remembers the fingerprint of the schema it was written with.
//! Given the ordered list of schema versions an application has shipped, a
//! [`Migration`] detects which version a store is at, backs it up and brings
//! it to the latest version one step at a time. Each step transforms records
//! with a [`MappingModel`], taken from a [`MappingCatalog`] of hand-written
//! mappings when one exists for the pair of versions, inferred otherwise.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Migration                          │
//! │   (version scan, backup, ordered steps, file replacement) │
//! └───────────────────────────────────────────────────────────┘
//!                             │
//!               ┌─────────────┴─────────────┐
//!               ▼                           ▼
//!        ┌─────────────┐             ┌─────────────┐
//!        │   Mapping   │             │    Store    │
//!        │   Catalog   │             │  (source &  │
//!        │ / inference │             │ destination)│
//!        └─────────────┘             └─────────────┘
//! ```
//!
//! The [`utility`] functions create one store per schema version, which is
//! how migrations are exercised in tests.

mod error;
mod mapping;
mod pipeline;
pub mod utility;

pub use error::{MigrationError, MigrationResult};
pub use mapping::{
    AttributeSource, EntityMapping, MappingCatalog, MappingModel, RelationshipSource,
    DEFAULT_BACKUP_DIR, MAPPING_FILE_SUFFIX,
};
pub use pipeline::{Migration, MigrationReport, MigrationStep};
pub use utility::{setup_store, setup_stores, SeedData, SeedRegistry};
