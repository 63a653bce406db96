//! Shared model references.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::batch::{Batch, BatchResult};
use crate::model::Model;
use crate::storage::{ObjectId, Store};

/// A shared, lockable reference to a model.
///
/// Handles compare by identity: two handles are equal only if they point at
/// the same model instance, which is what the identity cache guarantees for
/// models loaded in one session.
pub struct Handle<M> {
    inner: Arc<RwLock<M>>,
}

impl<M> Handle<M> {
    pub fn new(model: M) -> Self {
        Self {
            inner: Arc::new(RwLock::new(model)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, M> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, M> {
        self.inner.write()
    }

    /// Address of the shared instance, stable for the handle's lifetime.
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M: Model> Handle<M> {
    /// Current identifier of the model.
    pub fn id(&self) -> Option<ObjectId> {
        self.inner.read().id().cloned()
    }
}

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> PartialEq for Handle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<M> Eq for Handle<M> {}

impl<M> Hash for Handle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

// models may reference each other in cycles, so don't print through the handle
impl<M> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.key())
    }
}

/// Single-model shortcuts for a one-element [`Batch`].
pub trait Batchable: Sized {
    type Config;

    /// Reload the model from its record.
    fn load(&self, store: &Store, config: Option<&Self::Config>) -> BatchResult<()>;

    /// Save the model, assigning an identifier if it is new.
    fn save(&self, store: &Store, config: Option<&Self::Config>) -> BatchResult<()>;

    /// Delete the model's record.
    fn delete(&self, store: &Store) -> BatchResult<()>;

    /// True if the model has a record.
    fn exists(&self, store: &Store) -> bool;
}

impl<M: Model> Batchable for Handle<M> {
    type Config = M::Config;

    fn load(&self, store: &Store, config: Option<&M::Config>) -> BatchResult<()> {
        Batch::new(store).with_models(vec![self.clone()]).load(config)
    }

    fn save(&self, store: &Store, config: Option<&M::Config>) -> BatchResult<()> {
        Batch::new(store).with_models(vec![self.clone()]).save(config)
    }

    fn delete(&self, store: &Store) -> BatchResult<()> {
        Batch::new(store).with_models(vec![self.clone()]).delete()
    }

    fn exists(&self, store: &Store) -> bool {
        Batch::new(store).exist(std::slice::from_ref(self))
    }
}
