//! Static model type → entity registration.

use std::any::{type_name, TypeId};
use std::collections::HashMap;

use crate::storage::EntityName;

#[derive(Debug, Clone)]
struct Registration {
    entity: EntityName,
    type_name: &'static str,
}

/// Maps model types to the entities they are stored as.
///
/// Filled in once at start-up through [`Store::register`](crate::storage::Store::register).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<TypeId, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, returning the entity it was previously mapped to.
    pub fn register<M: 'static>(&mut self, entity: EntityName) -> Option<EntityName> {
        self.entries
            .insert(
                TypeId::of::<M>(),
                Registration {
                    entity,
                    type_name: type_name::<M>(),
                },
            )
            .map(|r| r.entity)
    }

    /// Entity a type is stored as.
    pub fn entity_for<M: 'static>(&self) -> Option<&EntityName> {
        self.entries.get(&TypeId::of::<M>()).map(|r| &r.entity)
    }

    /// Names of the types registered for an entity.
    pub fn types_for(&self, entity: &EntityName) -> Vec<&'static str> {
        self.entries
            .values()
            .filter(|r| &r.entity == entity)
            .map(|r| r.type_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
