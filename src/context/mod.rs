//! Units of work and identity tracking.
//!
//! A [`Context`] stages inserts, updates and deletes against a [`Store`] and
//! commits them at once; an [`IdentityCache`] makes sure a load session builds
//! at most one model per stored record.
//!
//! ```text
//!   Batch ──► Context ──commit──► Store ──notify──► listeners
//!     │          │
//!     └──► IdentityCache (shared across relationship resolution)
//! ```
//!
//! [`Store`]: crate::storage::Store

mod cache;
#[allow(clippy::module_inception)]
mod context;

pub use cache::IdentityCache;
pub use context::Context;
