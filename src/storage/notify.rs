//! Change notifications emitted after each commit.

use std::sync::{Arc, Weak};

use crate::storage::store::Store;
use crate::storage::types::{ContextId, EntityName, ObjectId};

/// A record touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedRecord {
    pub id: ObjectId,
    pub entity: EntityName,
}

/// Which kinds of change a listener cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeKinds {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl ChangeKinds {
    pub const ALL: ChangeKinds = ChangeKinds {
        insert: true,
        update: true,
        delete: true,
    };

    pub const NONE: ChangeKinds = ChangeKinds {
        insert: false,
        update: false,
        delete: false,
    };

    pub fn insert(mut self, enabled: bool) -> Self {
        self.insert = enabled;
        self
    }

    pub fn update(mut self, enabled: bool) -> Self {
        self.update = enabled;
        self
    }

    pub fn delete(mut self, enabled: bool) -> Self {
        self.delete = enabled;
        self
    }
}

impl Default for ChangeKinds {
    fn default() -> Self {
        Self::ALL
    }
}

/// What a single commit changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Context that committed the changes.
    pub origin: ContextId,
    pub inserted: Vec<ChangedRecord>,
    pub updated: Vec<ChangedRecord>,
    pub deleted: Vec<ChangedRecord>,
}

impl ChangeNotification {
    pub fn new(origin: ContextId) -> Self {
        Self {
            origin,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed records.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Keep only changes to one entity, of the enabled kinds.
    pub fn filtered(&self, entity: &EntityName, kinds: ChangeKinds) -> ChangeNotification {
        let pick = |enabled: bool, records: &[ChangedRecord]| -> Vec<ChangedRecord> {
            if !enabled {
                return Vec::new();
            }
            records
                .iter()
                .filter(|r| &r.entity == entity)
                .cloned()
                .collect()
        };

        ChangeNotification {
            origin: self.origin,
            inserted: pick(kinds.insert, &self.inserted),
            updated: pick(kinds.update, &self.updated),
            deleted: pick(kinds.delete, &self.deleted),
        }
    }
}

/// Receives notifications after commits on a [`Store`].
///
/// Called synchronously on the committing thread once the store's connection
/// is released, so implementations may read from the store.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, store: &Store, notification: &ChangeNotification);
}

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registered listeners, held weakly so a dropped observer stops receiving.
#[derive(Default)]
pub(crate) struct Listeners {
    next: u64,
    entries: Vec<(SubscriptionId, Weak<dyn ChangeListener>)>,
}

impl Listeners {
    pub(crate) fn subscribe(&mut self, listener: Weak<dyn ChangeListener>) -> SubscriptionId {
        self.next += 1;
        let id = SubscriptionId(self.next);
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Live listeners; dead entries are pruned.
    pub(crate) fn live(&mut self) -> Vec<Arc<dyn ChangeListener>> {
        self.entries.retain(|(_, listener)| listener.strong_count() > 0);
        self.entries
            .iter()
            .filter_map(|(_, listener)| listener.upgrade())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
