//! Transaction management for modelstore.
//!
//! This module lets several batches, of different model types, share one
//! context and commit once. Each transaction owns a context and an identity
//! cache; batches run in it stage their changes there. On commit the context
//! is written to the store and models saved as new get their identifiers; on
//! rollback everything staged is dropped.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                     │
//! │  (one transaction per thread, serializes commits)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │   Context   │       │  Identity   │
//!  │ (typestate) │       │  (shared)   │       │   Cache     │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use modelstore::batch::Batch;
//!
//! store.coordinator().with_transaction(|tx| {
//!     Batch::new(&store).with_models(authors).in_transaction(tx).save(None)?;
//!     Batch::new(&store).with_models(books).in_transaction(tx).save(None)?;
//!     Ok(())
//! })?;
//! ```

mod context;
mod coordinator;
mod error;

pub use context::{Transaction, TxAborted, TxActive, TxCommitted};
pub use coordinator::TransactionCoordinator;
pub use error::{TransactionError, TransactionResult};
