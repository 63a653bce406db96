//! modelstore - a model layer over a SQLite-backed object store
//!
//! Application types implement [`model::Model`] and are loaded, saved and
//! deleted in batches. A load shares one identity cache across every
//! relationship it traverses, so each stored record is represented by at most
//! one live model, even in cyclic graphs. Saves run through a context that
//! keeps inverse relationships consistent and commits atomically; several
//! batches can share a context through a transaction. Observers keep a model
//! list in sync with committed changes, and store files are migrated between
//! schema versions with a backup taken first.
//!
//! # Example
//!
//! ```ignore
//! use modelstore::batch::{Batch, FetchConfig};
//! use modelstore::storage::{Store, StoreConfig};
//!
//! let store = Store::open(StoreConfig::new("library.sqlite").schemas(schemas))?;
//! store.register::<Book>("Book")?;
//!
//! let mut batch = Batch::<Book>::new(&store);
//! batch.load(Some(&BookConfig::with_fetch(FetchConfig::new().limit(20))))?;
//! batch.models[0].write().title = "Dune".into();
//! batch.save(None)?;
//! ```

pub mod batch;
pub mod catalog;
pub mod context;
pub mod migration;
pub mod model;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod fixtures;
