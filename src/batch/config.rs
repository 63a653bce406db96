//! Per-call configuration for batch operations.

use std::fmt;
use std::sync::Arc;

use crate::storage::{EntityName, Filter, Query, Record, SortKey};

/// Configuration handed to load/save/delete for one model type.
///
/// Applications usually nest the configurations of related model types inside
/// their own struct so that a load can configure the whole graph it touches.
/// Absent values mean the default policy: no paging, construct and reuse.
pub trait Configuration: Send + Sync + 'static {
    /// Fetch parameters used on the query path.
    fn fetch(&self) -> Option<&FetchConfig> {
        None
    }

    /// How related models of this type are resolved.
    fn relationship(&self) -> Option<RelationshipPolicy> {
        None
    }
}

impl Configuration for () {}

/// Generic configuration for model types that don't need nesting.
#[derive(Debug, Clone, Default)]
pub struct BatchConfig {
    pub fetch: Option<FetchConfig>,
    pub relationship: Option<RelationshipPolicy>,
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_relationship(mut self, policy: RelationshipPolicy) -> Self {
        self.relationship = Some(policy);
        self
    }
}

impl Configuration for BatchConfig {
    fn fetch(&self) -> Option<&FetchConfig> {
        self.fetch.as_ref()
    }

    fn relationship(&self) -> Option<RelationshipPolicy> {
        self.relationship
    }
}

/// Limit, offset, sort keys and filter for a query-path load.
#[derive(Clone, Default)]
pub struct FetchConfig {
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Vec<SortKey>,
    pub filter: Option<Filter>,
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Append a sort key; later keys break ties of earlier ones.
    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn filter(mut self, filter: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Check a record against the filter only.
    pub fn accepts(&self, record: &Record) -> bool {
        self.filter.as_ref().map_or(true, |f| f(record))
    }

    /// Build the backend query for an entity.
    pub fn to_query(&self, entity: EntityName) -> Query {
        Query {
            entity,
            limit: self.limit,
            offset: self.offset,
            sort: self.sort.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("sort", &self.sort)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Relationship construction policy.
///
/// | construct     | update        | behaviour                                        |
/// |---------------|---------------|--------------------------------------------------|
/// | `None`        | `None`        | reuse a cached model, else construct one         |
/// | `Some(true)`  | any           | always construct, replacing the cached model      |
/// | `Some(false)` | any           | reuse a cached model, never construct            |
/// | any           | `Some(true)`  | refresh a reused model from its record           |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationshipPolicy {
    pub construct: Option<bool>,
    pub update: Option<bool>,
}

impl RelationshipPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn construct(mut self, construct: bool) -> Self {
        self.construct = Some(construct);
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = Some(update);
        self
    }

    pub(crate) fn bypasses_cache(&self) -> bool {
        self.construct == Some(true)
    }

    pub(crate) fn may_construct(&self) -> bool {
        self.construct != Some(false)
    }

    pub(crate) fn refreshes_cached(&self) -> bool {
        self.update == Some(true)
    }
}
