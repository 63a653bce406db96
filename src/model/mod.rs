//! Application models.
//!
//! A model type implements [`Model`] to say how it maps to records and is
//! passed around as a [`Handle`], a shared reference that compares by
//! identity. [`Batchable`] adds single-model load/save/delete on handles and
//! [`ModelObserver`] keeps a list of models current as the store changes.
//!
//! ```text
//!   Handle<M> ──load/save/delete──► Batch<M> ──► Context ──► Store
//!                                                             │
//!   ModelObserver<M> ◄────────────── change notifications ────┘
//! ```

mod handle;
#[allow(clippy::module_inception)]
mod model;
mod observer;

pub use handle::{Batchable, Handle};
pub use model::Model;
pub use observer::ModelObserver;
