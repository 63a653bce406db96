//! The batch engine.
//!
//! A [`Batch`] loads, saves or deletes models of one type against a store.
//! Loads share an [`IdentityCache`](crate::context::IdentityCache) with the
//! [`Resolver`] so that relationships, cyclic ones included, resolve to one
//! instance per record. Failures of single models are collected and reported
//! after the rest of the batch was applied.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Batch<M>                           │
//! │        (load by query or by model, save, delete, exist)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  Resolver   │       │   Context   │       │ Identity    │
//!  │(relations)  │       │(unit of wrk)│       │   Cache     │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use modelstore::batch::{Batch, FetchConfig};
//!
//! let mut batch = Batch::<Book>::new(&store);
//! batch.load(Some(&BookConfig::with_fetch(FetchConfig::new().limit(20))))?;
//!
//! batch.models[0].write().title = "Dune".into();
//! batch.save(None)?;
//! ```

#[allow(clippy::module_inception)]
mod batch;
mod config;
mod error;
mod relationship;

pub use batch::Batch;
pub use config::{BatchConfig, Configuration, FetchConfig, RelationshipPolicy};
pub use error::{BatchError, BatchResult, FailedModel, FailedModels, FailureReason, RelationshipError};
pub use relationship::Resolver;
