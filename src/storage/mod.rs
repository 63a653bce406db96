//! storage layer for modelstore
//!
//! this module provides the record store the model layer is built on: records
//! are JSON documents in a SQLite file, queried per entity, written in atomic
//! change sets, with listeners notified after every commit. The upper layers
//! (contexts, batches, observers) use this API and never touch rusqlite
//! directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  (schema, registry, fetch/record lookup, commit, listeners) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   record    │       │    query    │       │   notify    │
//!  │   (JSON)    │       │ (sort/page) │       │  (changes)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use modelstore::storage::{Store, StoreConfig, Query, EntityName};
//!
//! let store = Store::open(StoreConfig::new("./library.sqlite").schemas(schemas))?;
//!
//! let books = store.fetch(&Query::new(EntityName::new("Book")?).limit(10))?;
//! ```

mod config;
mod error;
mod metadata;
mod notify;
mod query;
mod record;
mod store;
mod types;

// Re-export public API
pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use metadata::StoreMetadata;
pub use notify::{ChangeKinds, ChangeListener, ChangeNotification, ChangedRecord, SubscriptionId};
pub use query::{compare_records, compare_values, Filter, Query, SortKey};
pub use record::{Record, RelationshipValue};
pub use store::{ChangeSet, Store};
pub use types::{ContextId, EntityName, InvalidNameError, ObjectId};
