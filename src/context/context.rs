//! Storage context - a unit of work over a store.
//!
//! A context collects inserts, updates and deletes until `commit`, which
//! writes them to the store in one atomic change set. Reads through the
//! context see its own pending changes. Relationship inverses declared in the
//! schema are kept in sync as records are updated or deleted.

use std::fmt;
use std::mem;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::context::cache::IdentityCache;
use crate::model::{Handle, Model};
use crate::storage::{
    ChangeNotification, ChangeSet, ContextId, EntityName, ObjectId, Query, Record,
    StorageError, StorageResult, Store,
};

/// Sets the identifier of a model saved as new once its record is committed.
struct PendingAssignment {
    /// Identity of the model handle.
    key: usize,
    id: ObjectId,
    assign: Box<dyn FnOnce(ObjectId) + Send>,
}

#[derive(Default)]
struct ContextState {
    inserted: IndexMap<ObjectId, Record>,
    updated: IndexMap<ObjectId, Record>,
    deleted: IndexMap<ObjectId, Record>,
    assignments: Vec<PendingAssignment>,
}

impl ContextState {
    fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }

    /// True if a pending change involves a record of `entity`.
    fn touches(&self, entity: &EntityName) -> bool {
        self.inserted
            .values()
            .chain(self.updated.values())
            .chain(self.deleted.values())
            .any(|record| record.entity() == entity)
    }

    fn stage(&mut self, record: Record) {
        match self.inserted.get_mut(record.id()) {
            Some(slot) => *slot = record,
            None => {
                self.updated.insert(record.id().clone(), record);
            }
        }
    }

    fn clear(&mut self) -> Vec<PendingAssignment> {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
        mem::take(&mut self.assignments)
    }
}

/// A unit of work against a [`Store`].
///
/// Clone to share; clones refer to the same pending changes.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    store: Store,
    cache: Option<IdentityCache>,
    /// Serial queue: work submitted through `perform_and_wait` never overlaps.
    queue: ReentrantMutex<()>,
    state: Mutex<ContextState>,
}

impl Context {
    /// Create a context without an identity cache.
    pub fn new(store: &Store) -> Self {
        Self::with_cache(store, None)
    }

    /// Create a context carrying an identity cache.
    pub fn with_cache(store: &Store, cache: Option<IdentityCache>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: store.next_context_id(),
                store: store.clone(),
                cache,
                queue: ReentrantMutex::new(()),
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn cache(&self) -> Option<&IdentityCache> {
        self.inner.cache.as_ref()
    }

    /// Run `f` on the context's queue and wait for it.
    ///
    /// Re-entrant: calling it again from inside `f` runs inline.
    pub fn perform_and_wait<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        let _queue = self.inner.queue.lock();
        f(self)
    }

    // ==================== Reads ====================

    /// Run a query over committed records merged with pending changes.
    ///
    /// With nothing pending for the entity the store runs the query itself.
    pub fn fetch(&self, query: &Query) -> StorageResult<Vec<Record>> {
        if !self.inner.state.lock().touches(&query.entity) {
            return self.inner.store.fetch(query);
        }
        let committed = self.inner.store.records_of(&query.entity)?;

        let state = self.inner.state.lock();
        let mut records: Vec<Record> = committed
            .into_iter()
            .filter(|r| !state.deleted.contains_key(r.id()))
            .map(|r| state.updated.get(r.id()).cloned().unwrap_or(r))
            .collect();
        records.extend(
            state
                .inserted
                .values()
                .filter(|r| r.entity() == &query.entity)
                .cloned(),
        );
        drop(state);

        Ok(query.apply(records))
    }

    /// Look up a record, `None` if it doesn't exist or is pending deletion.
    pub fn existing_record(&self, id: &ObjectId) -> StorageResult<Option<Record>> {
        let state = self.inner.state.lock();
        self.lookup(&state, id)
    }

    fn lookup(&self, state: &ContextState, id: &ObjectId) -> StorageResult<Option<Record>> {
        if state.deleted.contains_key(id) {
            return Ok(None);
        }
        if let Some(record) = state.inserted.get(id).or_else(|| state.updated.get(id)) {
            return Ok(Some(record.clone()));
        }
        self.inner.store.record(id)
    }

    // ==================== Writes ====================

    /// Create a new record, pending commit.
    ///
    /// The record gets a fresh identifier, attribute defaults and empty
    /// relationships.
    pub fn insert(&self, entity: &EntityName) -> StorageResult<Record> {
        let description = self
            .inner
            .store
            .schema()
            .entity(entity.as_str())
            .ok_or_else(|| StorageError::EntityNotFound(entity.to_string()))?;

        let mut record = Record::new(ObjectId::generate(), entity.clone());
        for attribute in &description.attributes {
            if let Some(default) = &attribute.default {
                record.set(attribute.name.clone(), default.clone());
            }
        }
        for relationship in &description.relationships {
            record.set_relationship(relationship.name.clone(), relationship.empty_value());
        }

        debug!(context = %self.inner.id, entity = %entity, id = %record.id(), "inserted record");
        self.inner
            .state
            .lock()
            .inserted
            .insert(record.id().clone(), record.clone());
        Ok(record)
    }

    /// Stage new values for an existing or inserted record.
    ///
    /// The record is validated against its entity. Relationships with a
    /// declared inverse update the records on the other side.
    pub fn update(&self, record: Record) -> StorageResult<()> {
        let schema = self.inner.store.schema();
        let entity = schema
            .entity(record.entity().as_str())
            .ok_or_else(|| StorageError::EntityNotFound(record.entity().to_string()))?;
        entity.validate_record(&record)?;

        let mut state = self.inner.state.lock();
        let before = self
            .lookup(&state, record.id())?
            .ok_or_else(|| StorageError::RecordNotFound(record.id().clone()))?;
        if before == record {
            return Ok(());
        }

        state.stage(record.clone());
        for relationship in &entity.relationships {
            let Some(inverse) = relationship.inverse.as_deref() else {
                continue;
            };
            let old = before.related_ids(&relationship.name);
            let new = record.related_ids(&relationship.name);
            for target in old.iter().filter(|id| !new.contains(id)) {
                self.unlink(&mut state, target, inverse, record.id())?;
            }
            for target in new.iter().filter(|id| !old.contains(id)) {
                self.link(&mut state, target, inverse, record.id(), &relationship.name)?;
            }
        }
        Ok(())
    }

    /// Mark a record for deletion. Returns false if there was nothing to delete.
    ///
    /// The record is removed from the inverse side of its relationships.
    pub fn delete(&self, id: &ObjectId) -> StorageResult<bool> {
        let mut state = self.inner.state.lock();
        let Some(record) = self.lookup(&state, id)? else {
            return Ok(false);
        };

        if let Some(entity) = self.inner.store.schema().entity(record.entity().as_str()) {
            for relationship in &entity.relationships {
                let Some(inverse) = relationship.inverse.as_deref() else {
                    continue;
                };
                for target in record.related_ids(&relationship.name) {
                    self.unlink(&mut state, &target, inverse, id)?;
                }
            }
        }

        state.updated.shift_remove(id);
        if state.inserted.shift_remove(id).is_none() {
            state.deleted.insert(id.clone(), record);
        }
        state.assignments.retain(|a| &a.id != id);

        debug!(context = %self.inner.id, id = %id, "deleted record");
        Ok(true)
    }

    /// Drop a pending insert without touching anything else.
    pub fn discard(&self, id: &ObjectId) -> bool {
        let mut state = self.inner.state.lock();
        state.assignments.retain(|a| &a.id != id);
        state.inserted.shift_remove(id).is_some()
    }

    /// Add `owner` to the inverse relationship of `target_id`.
    ///
    /// A to-one inverse that pointed at another owner is detached from that
    /// owner's `forward` relationship first.
    fn link(
        &self,
        state: &mut ContextState,
        target_id: &ObjectId,
        inverse: &str,
        owner: &ObjectId,
        forward: &str,
    ) -> StorageResult<()> {
        let Some(mut target) = self.lookup(state, target_id)? else {
            return Ok(());
        };
        if target.relationship(inverse).is_some_and(|v| v.contains(owner)) {
            return Ok(());
        }

        let previous = target.to_one(inverse).filter(|p| *p != owner).cloned();
        if let Some(previous) = previous {
            if let Some(mut record) = self.lookup(state, &previous)? {
                if let Some(value) = record.relationship_mut(forward) {
                    value.remove(target_id);
                }
                state.stage(record);
            }
        }

        self.ensure_relationship(&mut target, inverse);
        if let Some(value) = target.relationship_mut(inverse) {
            value.insert(owner.clone());
            state.stage(target);
        }
        Ok(())
    }

    /// Remove `owner` from the inverse relationship of `target_id`.
    fn unlink(
        &self,
        state: &mut ContextState,
        target_id: &ObjectId,
        inverse: &str,
        owner: &ObjectId,
    ) -> StorageResult<()> {
        let Some(mut target) = self.lookup(state, target_id)? else {
            return Ok(());
        };
        if let Some(value) = target.relationship_mut(inverse) {
            if value.contains(owner) {
                value.remove(owner);
                state.stage(target);
            }
        }
        Ok(())
    }

    fn ensure_relationship(&self, record: &mut Record, name: &str) {
        if record.relationship(name).is_some() {
            return;
        }
        let empty = self
            .inner
            .store
            .schema()
            .entity(record.entity().as_str())
            .and_then(|e| e.relationship(name))
            .map(|r| r.empty_value());
        if let Some(value) = empty {
            record.set_relationship(name, value);
        }
    }

    // ==================== Identity assignment ====================

    /// Assign `id` to `model` once the pending insert is committed.
    pub fn defer_assignment<M: Model>(&self, model: &Handle<M>, id: ObjectId) {
        let key = model.key();
        let mut state = self.inner.state.lock();
        if state.assignments.iter().any(|a| a.key == key) {
            return;
        }
        let handle = model.clone();
        state.assignments.push(PendingAssignment {
            key,
            id,
            assign: Box::new(move |id| handle.write().set_id(Some(id))),
        });
    }

    /// Identifier a model will receive on commit, if it was saved as new here.
    pub fn pending_id(&self, key: usize) -> Option<ObjectId> {
        self.inner
            .state
            .lock()
            .assignments
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.id.clone())
    }

    // ==================== Commit ====================

    pub fn has_changes(&self) -> bool {
        self.inner.state.lock().has_changes()
    }

    /// Number of pending inserts, updates and deletes.
    pub fn pending_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.inserted.len() + state.updated.len() + state.deleted.len()
    }

    /// Write pending changes to the store, then assign identifiers.
    ///
    /// Returns `None` when there was nothing to commit. On failure the pending
    /// changes are kept.
    pub fn commit(&self) -> StorageResult<Option<ChangeNotification>> {
        let _queue = self.inner.queue.lock();

        let changes = {
            let state = self.inner.state.lock();
            if !state.has_changes() {
                return Ok(None);
            }
            ChangeSet {
                inserted: state.inserted.values().cloned().collect(),
                updated: state.updated.values().cloned().collect(),
                deleted: state.deleted.values().cloned().collect(),
            }
        };

        let notification = self.inner.store.commit(changes, self.inner.id)?;

        let assignments = self.inner.state.lock().clear();
        for assignment in assignments {
            (assignment.assign)(assignment.id);
        }
        Ok(Some(notification))
    }

    /// Throw away all pending changes.
    pub fn rollback(&self) {
        let dropped = self.inner.state.lock().clear();
        debug!(context = %self.inner.id, assignments = dropped.len(), "rolled back context");
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("pending", &self.pending_count())
            .field("cached", &self.inner.cache.is_some())
            .finish()
    }
}
