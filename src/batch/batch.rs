//! The batch engine: load, save and delete a set of models of one type.

use std::any::type_name;

use tracing::{debug, warn};

use crate::batch::config::Configuration;
use crate::batch::error::{BatchError, BatchResult, FailedModel, FailedModels, FailureReason};
use crate::batch::relationship::Resolver;
use crate::context::{Context, IdentityCache};
use crate::model::{Handle, Model};
use crate::storage::{EntityName, Query, Record, Store};
use crate::transaction::{Transaction, TxActive};

/// A group of models of one type, loaded, saved or deleted together.
///
/// Without an explicit context every operation runs in a fresh one and commits
/// at the end. Inside a transaction the transaction's context is used and
/// nothing is committed until the transaction is.
pub struct Batch<M: Model> {
    store: Store,
    context: Option<Context>,
    transactional: bool,
    cache: Option<IdentityCache>,
    pub models: Vec<Handle<M>>,
}

impl<M: Model> Batch<M> {
    /// Create an empty batch. Loading it runs a query.
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
            context: None,
            transactional: false,
            cache: None,
            models: Vec::new(),
        }
    }

    /// Set the models to operate on.
    pub fn with_models(mut self, models: Vec<Handle<M>>) -> Self {
        self.models = models;
        self
    }

    /// Run in an existing context. Changes are still committed by the batch.
    pub fn in_context(mut self, context: &Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Run inside a transaction; commit and identifier assignment are left to it.
    pub fn in_transaction(mut self, transaction: &Transaction<TxActive>) -> Self {
        self.context = Some(transaction.context().clone());
        self.transactional = true;
        self
    }

    /// Share an identity cache with other batches.
    pub fn with_cache(mut self, cache: IdentityCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    fn entity(&self) -> Option<EntityName> {
        self.store.entity_for::<M>()
    }

    /// Context and cache for one operation.
    fn session(&self) -> (Context, IdentityCache) {
        let cache = self
            .cache
            .clone()
            .or_else(|| self.context.as_ref().and_then(|c| c.cache().cloned()))
            .unwrap_or_default();
        let context = self
            .context
            .clone()
            .unwrap_or_else(|| Context::with_cache(&self.store, Some(cache.clone())));
        (context, cache)
    }

    // ==================== Construction ====================

    /// Build a model from a record.
    ///
    /// The model is put into `cache` before it is populated, so relationships
    /// pointing back at it resolve to this instance. `update == Some(false)`
    /// skips populating it.
    pub fn construct(
        store: &Store,
        record: &Record,
        config: Option<&M::Config>,
        cache: &IdentityCache,
        update: Option<bool>,
    ) -> BatchResult<Handle<M>> {
        let resolver = Resolver::new(store, None, cache);
        Self::construct_with(&resolver, record, config, update)
    }

    pub(crate) fn construct_with(
        resolver: &Resolver<'_>,
        record: &Record,
        config: Option<&M::Config>,
        update: Option<bool>,
    ) -> BatchResult<Handle<M>> {
        let mut model =
            M::construct(record.id()).ok_or(BatchError::ConstructionUnsupported(type_name::<M>()))?;
        model.set_id(Some(record.id().clone()));

        let handle = Handle::new(model);
        resolver.cache().put(&handle);
        if update != Some(false) {
            M::update_from_record(&handle, record, resolver, config)?;
        }
        Ok(handle)
    }

    // ==================== Load ====================

    /// Load models.
    ///
    /// An empty batch runs a query built from the fetch configuration and
    /// replaces `models` with the result. Otherwise every model is reloaded
    /// from its record; models that can't be are dropped from `models` and
    /// reported in [`BatchError::LoadFailed`].
    pub fn load(&mut self, config: Option<&M::Config>) -> BatchResult<()> {
        let (context, cache) = self.session();
        let store = self.store.clone();

        context.perform_and_wait(|context| {
            let resolver = Resolver::new(&store, Some(context), &cache);
            if self.models.is_empty() {
                self.load_query(&resolver, config)
            } else {
                self.load_models(&resolver, config)
            }
        })
    }

    fn load_query(&mut self, resolver: &Resolver<'_>, config: Option<&M::Config>) -> BatchResult<()> {
        let entity = self
            .entity()
            .ok_or(BatchError::EntityNotResolved(type_name::<M>()))?;
        let query = match config.and_then(|c| c.fetch()) {
            Some(fetch) => fetch.to_query(entity),
            None => Query::new(entity),
        };
        let records = match resolver.context() {
            Some(context) => context.fetch(&query)?,
            None => self.store.fetch(&query)?,
        };

        // construct everything first so relationships among the results
        // resolve to the instances of this load
        let mut constructed = Vec::with_capacity(records.len());
        for record in &records {
            let model = match resolver.cache().get::<M>(record.id()) {
                Some(model) => model,
                None => Self::construct_with(resolver, record, config, Some(false))?,
            };
            constructed.push(model);
        }

        let mut loaded = Vec::with_capacity(constructed.len());
        let mut failed = FailedModels::default();
        for (model, record) in constructed.into_iter().zip(&records) {
            match M::update_from_record(&model, record, resolver, config) {
                Ok(()) => loaded.push(model),
                Err(err) => failed.push(FailedModel::new(&model, per_model(err)?)),
            }
        }

        debug!(entity = %query.entity, loaded = loaded.len(), failed = failed.len(), "loaded by query");
        self.models = loaded;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BatchError::LoadFailed(failed))
        }
    }

    fn load_models(&mut self, resolver: &Resolver<'_>, config: Option<&M::Config>) -> BatchResult<()> {
        // cache first: relationships among the models being loaded must
        // resolve to them instead of constructing copies
        resolver.cache().put_all(&self.models);

        let mut loaded = Vec::with_capacity(self.models.len());
        let mut failed = FailedModels::default();
        for model in &self.models {
            let record = match model.id() {
                Some(id) => resolver.record(&id)?,
                None => None,
            };
            let Some(record) = record else {
                warn!(model = type_name::<M>(), id = ?model.id(), "model has no record");
                resolver.cache().remove(model);
                failed.push(FailedModel::new(model, FailureReason::Missing));
                continue;
            };
            match M::update_from_record(model, &record, resolver, config) {
                Ok(()) => loaded.push(model.clone()),
                Err(err) => {
                    let reason = per_model(err)?;
                    warn!(model = type_name::<M>(), id = %record.id(), reason = %reason, "cannot load model");
                    failed.push(FailedModel::new(model, reason));
                }
            }
        }

        self.models = loaded;
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BatchError::LoadFailed(failed))
        }
    }

    // ==================== Save ====================

    /// Save models.
    ///
    /// Identified models update their record; the others get a new record
    /// and learn its identifier after the commit. Models that fail are
    /// reported in [`BatchError::SaveFailed`] after the rest was committed.
    pub fn save(&mut self, config: Option<&M::Config>) -> BatchResult<()> {
        if self.models.is_empty() {
            return Ok(());
        }

        let (context, cache) = self.session();
        let store = self.store.clone();
        let entity = self.entity();
        let transactional = self.transactional;
        let models = &self.models;

        let failed = context.perform_and_wait(|context| -> BatchResult<FailedModels> {
            let resolver = Resolver::new(&store, Some(context), &cache);
            let mut failed = FailedModels::default();
            for model in models {
                let reason = match Self::save_one(&resolver, context, entity.as_ref(), model, config) {
                    Ok(None) => continue,
                    Ok(Some(reason)) => reason,
                    Err(err) => per_model(err)?,
                };
                warn!(model = type_name::<M>(), id = ?model.id(), reason = %reason, "cannot save model");
                failed.push(FailedModel::new(model, reason));
            }

            if !transactional && context.has_changes() {
                context.commit()?;
            }
            Ok(failed)
        })?;

        cache.put_all(&self.models);
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BatchError::SaveFailed(failed))
        }
    }

    fn save_one(
        resolver: &Resolver<'_>,
        context: &Context,
        entity: Option<&EntityName>,
        model: &Handle<M>,
        config: Option<&M::Config>,
    ) -> BatchResult<Option<FailureReason>> {
        if let Some(id) = model.id() {
            let Some(mut record) = context.existing_record(&id)? else {
                return Ok(Some(FailureReason::StaleIdentifier));
            };
            M::update_record(model, &mut record, resolver, config)?;
            context.update(record)?;
            return Ok(None);
        }

        // already inserted earlier in this context
        if let Some(id) = context.pending_id(model.key()) {
            if let Some(mut record) = context.existing_record(&id)? {
                M::update_record(model, &mut record, resolver, config)?;
                context.update(record)?;
                return Ok(None);
            }
        }

        let Some(entity) = entity else {
            return Ok(Some(FailureReason::NoEntity));
        };
        let mut record = context.insert(entity)?;
        let id = record.id().clone();
        let written = M::update_record(model, &mut record, resolver, config)
            .and_then(|()| context.update(record).map_err(BatchError::from));
        if let Err(err) = written {
            context.discard(&id);
            return Err(err);
        }
        context.defer_assignment(model, id);
        Ok(None)
    }

    // ==================== Delete ====================

    /// Delete the records of all models and empty the batch.
    ///
    /// Models without a record are treated as already deleted. Deleted models
    /// keep their identifier.
    pub fn delete(&mut self) -> BatchResult<()> {
        if self.models.is_empty() {
            return Ok(());
        }

        let (context, cache) = self.session();
        let transactional = self.transactional;
        let models = &self.models;

        let deleted = context.perform_and_wait(|context| -> BatchResult<usize> {
            let mut deleted = 0;
            for model in models {
                if let Some(id) = model.id() {
                    if context.delete(&id)? {
                        deleted += 1;
                    }
                }
                cache.remove(model);
            }
            if !transactional && context.has_changes() {
                context.commit()?;
            }
            Ok(deleted)
        })?;

        debug!(model = type_name::<M>(), requested = self.models.len(), deleted, "deleted models");
        self.models.clear();
        Ok(())
    }

    // ==================== Exist ====================

    /// True if every model has a record. An empty list does not exist.
    pub fn exist(&self, models: &[Handle<M>]) -> bool {
        if models.is_empty() {
            return false;
        }

        let context = self
            .context
            .clone()
            .unwrap_or_else(|| Context::new(&self.store));
        context.perform_and_wait(|context| {
            models.iter().all(|model| {
                let Some(id) = model.id().or_else(|| context.pending_id(model.key())) else {
                    return false;
                };
                match context.existing_record(&id) {
                    Ok(record) => record.is_some(),
                    Err(err) => {
                        warn!(id = %id, error = %err, "cannot check record");
                        false
                    }
                }
            })
        })
    }
}

/// Errors that fail a single model instead of the whole batch.
fn per_model(err: BatchError) -> BatchResult<FailureReason> {
    match err {
        BatchError::Relationship(err) => Ok(FailureReason::Relationship(err)),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{library, Author, Book, BookConfig, User};
    use crate::batch::{FetchConfig, RelationshipError};
    use crate::storage::SortKey;

    fn books(titles: &[&str]) -> Vec<Handle<Book>> {
        titles.iter().map(|t| Handle::new(Book::new(*t))).collect()
    }

    fn save_author(store: &Store, name: &str) -> Handle<Author> {
        let author = Handle::new(Author::named(name));
        let mut batch = Batch::new(store).with_models(vec![author.clone()]);
        batch.save(None).unwrap();
        author
    }

    #[test]
    fn test_save_reload_delete_scenario() {
        let store = library();
        let titles: Vec<String> = (0..10).map(|i| format!("Volume {i}")).collect();
        let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let models = books(&refs);

        let mut batch = Batch::new(&store).with_models(models.clone());
        batch.save(None).unwrap();
        assert!(models.iter().all(|m| m.id().is_some()));

        let reloaded: Vec<Handle<Book>> = models
            .iter()
            .map(|m| {
                let mut fresh = Book::new("");
                fresh.id = m.id();
                Handle::new(fresh)
            })
            .collect();
        let mut batch = Batch::new(&store).with_models(reloaded.clone());
        batch.load(None).unwrap();
        for (model, title) in batch.models.iter().zip(&titles) {
            assert_eq!(&model.read().title, title);
        }

        let mut batch = Batch::new(&store).with_models(models.clone());
        batch.delete().unwrap();
        assert!(batch.is_empty());

        let mut batch = Batch::new(&store).with_models(reloaded);
        let err = batch.load(None).unwrap_err();
        assert_eq!(err.failed().unwrap().len(), 10);
        assert!(batch.models.is_empty());
    }

    #[test]
    fn test_load_partial_success() {
        let store = library();
        let models = books(&["Dune", "Ubik", "Solaris"]);
        Batch::new(&store).with_models(models.clone()).save(None).unwrap();
        Batch::new(&store)
            .with_models(vec![models[1].clone()])
            .delete()
            .unwrap();

        let mut batch = Batch::new(&store).with_models(models.clone());
        let err = batch.load(None).unwrap_err();
        assert!(err.is_partial());

        let failed = err.failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed.models::<Book>()[0].ptr_eq(&models[1]));
        assert!(matches!(failed.iter().next().unwrap().reason, FailureReason::Missing));

        assert_eq!(batch.models.len(), 2);
        assert!(batch.models[0].ptr_eq(&models[0]));
        assert!(batch.models[1].ptr_eq(&models[2]));
    }

    #[test]
    fn test_load_by_query_with_fetch_config() {
        let store = library();
        let models = books(&["Dune", "Ubik", "Solaris", "Neuromancer"]);
        for (model, year) in models.iter().zip([1965, 1969, 1961, 1984]) {
            model.write().year = Some(year);
        }
        Batch::new(&store).with_models(models).save(None).unwrap();

        let config = BookConfig::with_fetch(
            FetchConfig::new()
                .sort(SortKey::desc("year"))
                .offset(1)
                .limit(2)
                .filter(|r| r.get_str("title") != Some("Ubik")),
        );
        let mut batch = Batch::<Book>::new(&store);
        batch.load(Some(&config)).unwrap();

        let titles: Vec<String> = batch.models.iter().map(|m| m.read().title.clone()).collect();
        assert_eq!(titles, vec!["Dune", "Solaris"]);
    }

    #[test]
    fn test_load_unregistered_type() {
        let store = library();
        let mut batch = Batch::<User>::new(&store);
        assert!(matches!(batch.load(None), Err(BatchError::EntityNotResolved(_))));
    }

    #[test]
    fn test_load_builds_shared_graph() {
        let store = library();
        let herbert = save_author(&store, "Frank Herbert");
        let models = books(&["Dune", "Dune Messiah"]);
        for model in &models {
            model.write().author = Some(herbert.clone());
        }
        Batch::new(&store).with_models(models).save(None).unwrap();

        let mut batch = Batch::<Book>::new(&store);
        batch.load(None).unwrap();
        assert_eq!(batch.models.len(), 2);

        let first = batch.models[0].read().author.clone().unwrap();
        let second = batch.models[1].read().author.clone().unwrap();
        assert!(first.ptr_eq(&second));
        assert!(!first.ptr_eq(&herbert));

        // the author's books are the instances this load returned
        let owned = first.read().books.clone();
        assert_eq!(owned.len(), 2);
        assert!(owned[0].ptr_eq(&batch.models[0]));
        assert!(owned[1].ptr_eq(&batch.models[1]));
    }

    #[test]
    fn test_relationship_round_trip_shares_instances() {
        let store = library();
        let herbert = save_author(&store, "Frank Herbert");
        let dune = Handle::new(Book::new("Dune"));
        dune.write().author = Some(herbert.clone());
        Batch::new(&store).with_models(vec![dune.clone()]).save(None).unwrap();

        let mut fresh = Book::new("");
        fresh.id = dune.id();
        let reloaded = Handle::new(fresh);
        Batch::new(&store)
            .with_models(vec![reloaded.clone()])
            .load(None)
            .unwrap();

        let author = reloaded.read().author.clone().unwrap();
        let via_author = author.read().books[0].clone();
        assert!(via_author.ptr_eq(&reloaded));
        let round_trip = via_author.read().author.clone().unwrap();
        assert!(round_trip.ptr_eq(&author));
    }

    #[test]
    fn test_save_is_idempotent_for_identified_models() {
        let store = library();
        let dune = Handle::new(Book::new("Dune"));
        let mut batch = Batch::new(&store).with_models(vec![dune.clone()]);
        batch.save(None).unwrap();
        let id = dune.id().unwrap();

        batch.save(None).unwrap();
        assert_eq!(dune.id(), Some(id));
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_save_updates_existing_record() {
        let store = library();
        let dune = Handle::new(Book::new("Dune"));
        let mut batch = Batch::new(&store).with_models(vec![dune.clone()]);
        batch.save(None).unwrap();

        dune.write().year = Some(1965);
        batch.save(None).unwrap();
        let record = store.record(&dune.id().unwrap()).unwrap().unwrap();
        assert_eq!(record.get_i64("year"), Some(1965));
    }

    #[test]
    fn test_save_reports_failures_after_committing_rest() {
        let store = library();
        let unsaved_author = Handle::new(Author::named("Nobody"));
        let orphan = Handle::new(Book::new("Orphan"));
        orphan.write().author = Some(unsaved_author);
        let dune = Handle::new(Book::new("Dune"));

        let mut batch = Batch::new(&store).with_models(vec![orphan.clone(), dune.clone()]);
        let err = batch.save(None).unwrap_err();

        let failed = err.failed().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed.iter().next().unwrap().reason,
            FailureReason::Relationship(RelationshipError::NoBackingRecord { .. })
        ));
        assert!(orphan.id().is_none());
        assert!(dune.id().is_some());
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_save_unregistered_type_fails_per_model() {
        let store = library();
        let ada = Handle::new(User::named("Ada"));
        let mut batch = Batch::new(&store).with_models(vec![ada.clone()]);
        let err = batch.save(None).unwrap_err();
        let failed = err.failed().unwrap();
        assert!(matches!(failed.iter().next().unwrap().reason, FailureReason::NoEntity));
        assert!(ada.id().is_none());
    }

    #[test]
    fn test_resave_after_delete_is_stale() {
        let store = library();
        let dune = Handle::new(Book::new("Dune"));
        let mut batch = Batch::new(&store).with_models(vec![dune.clone()]);
        batch.save(None).unwrap();
        Batch::new(&store).with_models(vec![dune.clone()]).delete().unwrap();

        let err = batch.save(None).unwrap_err();
        let failed = err.failed().unwrap();
        assert!(matches!(failed.iter().next().unwrap().reason, FailureReason::StaleIdentifier));
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_same_model_twice_inserts_once() {
        let store = library();
        let dune = Handle::new(Book::new("Dune"));
        let mut batch = Batch::new(&store).with_models(vec![dune.clone(), dune.clone()]);
        batch.save(None).unwrap();
        assert_eq!(store.count(&"Book".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_exist() {
        let store = library();
        let models = books(&["Dune", "Ubik"]);
        let batch = Batch::new(&store);
        assert!(!batch.exist(&[]));
        assert!(!batch.exist(&models));

        Batch::new(&store).with_models(models.clone()).save(None).unwrap();
        assert!(batch.exist(&models));

        Batch::new(&store)
            .with_models(vec![models[0].clone()])
            .delete()
            .unwrap();
        assert!(!batch.exist(&models));
        assert!(batch.exist(&models[1..]));
    }

    #[test]
    fn test_construct_requires_constructor() {
        let store = library();
        let dune = Handle::new(Book::new("Dune"));
        Batch::new(&store).with_models(vec![dune.clone()]).save(None).unwrap();
        let record = store.record(&dune.id().unwrap()).unwrap().unwrap();

        let cache = IdentityCache::new();
        let built = Batch::<Book>::construct(&store, &record, None, &cache, Some(false)).unwrap();
        assert_eq!(built.read().title, "");
        assert!(cache.get::<Book>(record.id()).unwrap().ptr_eq(&built));

        // types without a constructor can only be loaded explicitly
        let err = Batch::<crate::fixtures::Unbuildable>::construct(&store, &record, None, &cache, None)
            .unwrap_err();
        assert!(matches!(err, BatchError::ConstructionUnsupported(_)));
    }
}
