//! Keeps a list of models in step with store commits.
//!
//! The observer registers with the store and patches its list from every
//! change notification instead of reloading it: inserted records are
//! constructed and appended, updated ones refreshed in place, deleted ones
//! removed. When something was inserted the list is re-sorted and cut to the
//! configured limit. Models that leave the list also leave the observer's
//! identity cache. The fetch offset only applies to the initial load.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::batch::{Batch, BatchError, BatchResult, Configuration, FetchConfig, Resolver};
use crate::context::IdentityCache;
use crate::model::{Handle, Model};
use crate::storage::{
    compare_records, ChangeKinds, ChangeListener, ChangeNotification, EntityName, ObjectId,
    Record, SortKey, Store, SubscriptionId,
};

type UpdateCallback<M> = Arc<dyn Fn(&[Handle<M>]) + Send + Sync>;

/// Observes one model type.
///
/// Notifications are handled on the committing thread, one at a time per
/// observer. The observer unsubscribes when dropped.
pub struct ModelObserver<M: Model> {
    store: Store,
    subscription: SubscriptionId,
    inner: Arc<ObserverInner<M>>,
}

struct ObserverInner<M: Model> {
    entity: EntityName,
    config: Option<M::Config>,
    kinds: ChangeKinds,
    models: Mutex<Vec<Handle<M>>>,
    cache: IdentityCache,
    callbacks: Mutex<Vec<UpdateCallback<M>>>,
    /// Single flight: one notification or load at a time.
    flight: ReentrantMutex<()>,
}

impl<M: Model> ModelObserver<M> {
    /// Start observing `M`, which must be registered with the store.
    ///
    /// The list starts empty; call [`load`](Self::load) to fill it.
    pub fn new(store: &Store, config: Option<M::Config>, kinds: ChangeKinds) -> BatchResult<Self> {
        let entity = store
            .entity_for::<M>()
            .ok_or(BatchError::EntityNotResolved(std::any::type_name::<M>()))?;

        let inner = Arc::new(ObserverInner {
            entity,
            config,
            kinds,
            models: Mutex::new(Vec::new()),
            cache: IdentityCache::new(),
            callbacks: Mutex::new(Vec::new()),
            flight: ReentrantMutex::new(()),
        });
        let listener: Arc<dyn ChangeListener> = inner.clone();
        let weak: Weak<dyn ChangeListener> = Arc::downgrade(&listener);
        let subscription = store.subscribe(weak);

        debug!(entity = %inner.entity, "observer subscribed");
        Ok(Self {
            store: store.clone(),
            subscription,
            inner,
        })
    }

    /// Fill the list with a full fetch using the configuration.
    ///
    /// On a partial failure the successfully loaded models are kept.
    pub fn load(&self) -> BatchResult<()> {
        let _flight = self.inner.flight.lock();

        let mut batch = Batch::<M>::new(&self.store).with_cache(self.inner.cache.clone());
        let result = batch.load(self.inner.config.as_ref());
        if let Err(err) = &result {
            if !err.is_partial() {
                return result;
            }
        }

        let previous = std::mem::replace(&mut *self.inner.models.lock(), batch.models.clone());
        for model in previous {
            if !batch.models.iter().any(|kept| kept.id() == model.id()) {
                self.inner.cache.remove(&model);
            }
        }
        self.inner.notify();
        result
    }

    /// Current models, in list order.
    pub fn models(&self) -> Vec<Handle<M>> {
        self.inner.models.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.models.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.models.lock().is_empty()
    }

    pub fn kinds(&self) -> ChangeKinds {
        self.inner.kinds
    }

    /// Call `f` with the new list every time it changes.
    pub fn on_update(&self, f: impl Fn(&[Handle<M>]) + Send + Sync + 'static) {
        self.inner.callbacks.lock().push(Arc::new(f));
    }
}

impl<M: Model> Drop for ModelObserver<M> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}

impl<M: Model> ObserverInner<M> {
    fn fetch(&self) -> Option<&FetchConfig> {
        self.config.as_ref().and_then(|c| c.fetch())
    }

    fn notify(&self) {
        let models = self.models.lock().clone();
        let callbacks: Vec<UpdateCallback<M>> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(&models);
        }
    }

    fn apply(&self, store: &Store, notification: &ChangeNotification) {
        let _flight = self.flight.lock();

        let changes = notification.filtered(&self.entity, self.kinds);
        if changes.is_empty() {
            return;
        }

        let config = self.config.as_ref();
        let resolver = Resolver::new(store, None, &self.cache);
        let mut models = self.models.lock().clone();
        let mut changed = false;

        let mut inserted = false;
        for change in &changes.inserted {
            let Some(record) = self.committed(store, &change.id) else {
                continue;
            };
            if self.fetch().is_some_and(|f| !f.accepts(&record)) {
                continue;
            }
            if position(&models, record.id()).is_some() {
                continue;
            }
            match Batch::<M>::construct_with(&resolver, &record, config, None) {
                Ok(model) => {
                    models.push(model);
                    inserted = true;
                }
                Err(err) => warn!(entity = %self.entity, id = %record.id(), error = %err, "observer cannot construct model"),
            }
        }

        for change in &changes.updated {
            let Some(index) = position(&models, &change.id) else {
                continue;
            };
            let Some(record) = self.committed(store, &change.id) else {
                continue;
            };
            match M::update_from_record(&models[index], &record, &resolver, config) {
                Ok(()) => changed = true,
                Err(err) => warn!(entity = %self.entity, id = %change.id, error = %err, "observer cannot refresh model"),
            }
        }

        let mut doomed: Vec<usize> = changes
            .deleted
            .iter()
            .filter_map(|change| position(&models, &change.id))
            .collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        doomed.dedup();
        for index in doomed {
            let model = models.remove(index);
            self.cache.remove(&model);
            changed = true;
        }

        if inserted {
            if let Some(fetch) = self.fetch() {
                if !fetch.sort.is_empty() {
                    sort_models(store, &mut models, &fetch.sort);
                }
                if let Some(limit) = fetch.limit {
                    if models.len() > limit {
                        for model in models.split_off(limit) {
                            self.cache.remove(&model);
                        }
                    }
                }
            }
            changed = true;
        }

        if !changed {
            return;
        }
        debug!(entity = %self.entity, models = models.len(), "observer applied changes");
        *self.models.lock() = models;
        self.notify();
    }

    fn committed(&self, store: &Store, id: &ObjectId) -> Option<Record> {
        match store.record(id) {
            Ok(record) => record,
            Err(err) => {
                warn!(entity = %self.entity, id = %id, error = %err, "observer cannot read record");
                None
            }
        }
    }
}

impl<M: Model> ChangeListener for ObserverInner<M> {
    fn on_change(&self, store: &Store, notification: &ChangeNotification) {
        self.apply(store, notification);
    }
}

fn position<M: Model>(models: &[Handle<M>], id: &ObjectId) -> Option<usize> {
    models.iter().position(|m| m.id().as_ref() == Some(id))
}

/// Stable sort by the models' records; models without a record go last.
fn sort_models<M: Model>(store: &Store, models: &mut Vec<Handle<M>>, keys: &[SortKey]) {
    let mut keyed: Vec<(Option<Record>, Handle<M>)> = models
        .drain(..)
        .map(|model| {
            let record = model.id().and_then(|id| store.record(&id).ok().flatten());
            (record, model)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => compare_records(keys, a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    models.extend(keyed.into_iter().map(|(_, model)| model));
}
