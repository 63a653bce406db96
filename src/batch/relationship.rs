//! Relationship resolution.
//!
//! Reading turns the identifiers held by a relationship into models, going
//! through the identity cache so a cyclic graph resolves to shared instances.
//! Writing turns models back into identifiers; every model written must
//! already have a record in the context.

use crate::batch::batch::Batch;
use crate::batch::config::Configuration;
use crate::batch::error::{BatchResult, RelationshipError};
use crate::context::{Context, IdentityCache};
use crate::model::{Handle, Model};
use crate::storage::{ObjectId, Record, RelationshipValue, Store};

/// Resolves relationships for one load or save session.
///
/// Handed to [`Model::update_from_record`] and [`Model::update_record`].
pub struct Resolver<'a> {
    store: &'a Store,
    context: Option<&'a Context>,
    cache: &'a IdentityCache,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(store: &'a Store, context: Option<&'a Context>, cache: &'a IdentityCache) -> Self {
        Self {
            store,
            context,
            cache,
        }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn context(&self) -> Option<&Context> {
        self.context
    }

    pub fn cache(&self) -> &IdentityCache {
        self.cache
    }

    /// Look up a record through the context if there is one.
    pub fn record(&self, id: &ObjectId) -> BatchResult<Option<Record>> {
        let record = match self.context {
            Some(context) => context.existing_record(id)?,
            None => self.store.record(id)?,
        };
        Ok(record)
    }

    // ==================== Reads ====================

    /// Resolve a to-one relationship.
    ///
    /// `config` is the configuration of the related model type; its
    /// relationship policy decides whether cached models are reused,
    /// refreshed or rebuilt. Identifiers of deleted records resolve to `None`.
    pub fn to_one<R: Model>(
        &self,
        record: &Record,
        name: &str,
        config: Option<&R::Config>,
    ) -> BatchResult<Option<Handle<R>>> {
        self.check(record, name, false)?;
        match record.to_one(name) {
            Some(id) => self.resolve::<R>(id, config),
            None => Ok(None),
        }
    }

    /// Resolve a to-many relationship, keeping its order.
    ///
    /// Identifiers that don't resolve are skipped.
    pub fn to_many<R: Model>(
        &self,
        record: &Record,
        name: &str,
        config: Option<&R::Config>,
    ) -> BatchResult<Vec<Handle<R>>> {
        self.check(record, name, true)?;
        let mut models = Vec::new();
        for id in record.to_many(name) {
            if let Some(model) = self.resolve::<R>(id, config)? {
                models.push(model);
            }
        }
        Ok(models)
    }

    fn resolve<R: Model>(&self, id: &ObjectId, config: Option<&R::Config>) -> BatchResult<Option<Handle<R>>> {
        let policy = config.and_then(|c| c.relationship()).unwrap_or_default();

        if !policy.bypasses_cache() {
            if let Some(cached) = self.cache.get::<R>(id) {
                if policy.refreshes_cached() {
                    if let Some(record) = self.record(id)? {
                        R::update_from_record(&cached, &record, self, config)?;
                    }
                }
                return Ok(Some(cached));
            }
            if !policy.may_construct() {
                return Ok(None);
            }
        }

        match self.record(id)? {
            Some(record) => Batch::<R>::construct_with(self, &record, config, None).map(Some),
            None => Ok(None),
        }
    }

    // ==================== Writes ====================

    /// Point a to-one relationship at `model`, or clear it.
    pub fn set_to_one<R: Model>(
        &self,
        record: &mut Record,
        name: &str,
        model: Option<&Handle<R>>,
    ) -> BatchResult<()> {
        self.check(record, name, false)?;
        let context = self.writable(name)?;
        let id = model
            .map(|m| self.backing_id(context, name, m))
            .transpose()?;
        record.set_relationship(name, RelationshipValue::ToOne(id));
        Ok(())
    }

    /// Replace the whole content of a to-many relationship.
    pub fn set_to_many<R: Model>(
        &self,
        record: &mut Record,
        name: &str,
        models: &[Handle<R>],
    ) -> BatchResult<()> {
        self.check(record, name, true)?;
        let context = self.writable(name)?;
        let ids = models
            .iter()
            .map(|m| self.backing_id(context, name, m))
            .collect::<BatchResult<Vec<_>>>()?;
        record.set_relationship(name, RelationshipValue::ToMany(ids));
        Ok(())
    }

    fn writable(&self, name: &str) -> Result<&'a Context, RelationshipError> {
        self.context.ok_or_else(|| RelationshipError::NoContext {
            relationship: name.to_string(),
        })
    }

    /// Identifier of the record behind a model, including models saved as
    /// new earlier in the same context.
    fn backing_id<R: Model>(&self, context: &Context, name: &str, model: &Handle<R>) -> BatchResult<ObjectId> {
        let id = model.id().or_else(|| context.pending_id(model.key()));
        if let Some(id) = id {
            if context.existing_record(&id)?.is_some() {
                return Ok(id);
            }
        }
        Err(RelationshipError::NoBackingRecord {
            relationship: name.to_string(),
        }
        .into())
    }

    fn check(&self, record: &Record, name: &str, to_many: bool) -> Result<(), RelationshipError> {
        let description = self
            .store
            .schema()
            .entity(record.entity().as_str())
            .and_then(|e| e.relationship(name))
            .ok_or_else(|| RelationshipError::UndefinedRelationship {
                entity: record.entity().to_string(),
                relationship: name.to_string(),
            })?;
        if description.to_many != to_many {
            return Err(RelationshipError::CardinalityMismatch {
                entity: record.entity().to_string(),
                relationship: name.to_string(),
            });
        }
        Ok(())
    }
}
