//! Identity cache: at most one live model per (type, identifier).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{Handle, Model};
use crate::storage::ObjectId;

type CacheKey = (TypeId, ObjectId);

/// Maps identifiers to already constructed models.
///
/// Cloning is cheap and clones share entries, which is how one cache is
/// threaded through a load and every relationship it resolves. Models without
/// an identifier are never cached.
#[derive(Clone, Default)]
pub struct IdentityCache {
    entries: Arc<Mutex<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached model of type `M` for an identifier.
    pub fn get<M: Model>(&self, id: &ObjectId) -> Option<Handle<M>> {
        let entries = self.entries.lock();
        entries
            .get(&(TypeId::of::<M>(), id.clone()))
            .and_then(|entry| entry.downcast_ref::<Handle<M>>())
            .cloned()
    }

    /// Cache a model under its current identifier, replacing any previous entry.
    ///
    /// Returns false if the model has no identifier.
    pub fn put<M: Model>(&self, model: &Handle<M>) -> bool {
        let Some(id) = model.id() else {
            return false;
        };
        self.entries
            .lock()
            .insert((TypeId::of::<M>(), id), Arc::new(model.clone()));
        true
    }

    /// Cache several models, returning how many were cached.
    pub fn put_all<M: Model>(&self, models: &[Handle<M>]) -> usize {
        models.iter().filter(|m| self.put(*m)).count()
    }

    /// Drop a model's entry.
    pub fn remove<M: Model>(&self, model: &Handle<M>) -> bool {
        match model.id() {
            Some(id) => self.remove_id::<M>(&id),
            None => false,
        }
    }

    /// Drop the entry for an identifier.
    pub fn remove_id<M: Model>(&self, id: &ObjectId) -> bool {
        self.entries
            .lock()
            .remove(&(TypeId::of::<M>(), id.clone()))
            .is_some()
    }

    pub fn contains<M: Model>(&self, id: &ObjectId) -> bool {
        self.entries
            .lock()
            .contains_key(&(TypeId::of::<M>(), id.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Author, Book};

    fn identified_book(id: &str, title: &str) -> Handle<Book> {
        let book = Handle::new(Book::new(title));
        book.write().id = Some(ObjectId::new(id).unwrap());
        book
    }

    #[test]
    fn test_put_and_get_same_instance() {
        let cache = IdentityCache::new();
        let book = identified_book("b1", "Dune");

        assert!(cache.put(&book));
        let cached = cache.get::<Book>(&ObjectId::new("b1").unwrap()).unwrap();
        assert!(cached.ptr_eq(&book));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_are_per_type() {
        let cache = IdentityCache::new();
        let book = identified_book("x1", "Dune");
        cache.put(&book);

        let id = ObjectId::new("x1").unwrap();
        assert!(cache.get::<Author>(&id).is_none());
        assert!(cache.contains::<Book>(&id));
    }

    #[test]
    fn test_unidentified_models_are_not_cached() {
        let cache = IdentityCache::new();
        let book = Handle::new(Book::new("Draft"));
        assert!(!cache.put(&book));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces_and_remove() {
        let cache = IdentityCache::new();
        let first = identified_book("b1", "Dune");
        let second = identified_book("b1", "Dune (reprint)");

        cache.put(&first);
        cache.put(&second);
        let id = ObjectId::new("b1").unwrap();
        assert!(cache.get::<Book>(&id).unwrap().ptr_eq(&second));

        assert!(cache.remove(&second));
        assert!(!cache.remove_id::<Book>(&id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = IdentityCache::new();
        let shared = cache.clone();
        shared.put(&identified_book("b1", "Dune"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(shared.is_empty());
    }
}
