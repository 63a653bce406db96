//! Record queries: entity, filter, sort keys and paging.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::storage::record::Record;
use crate::storage::types::EntityName;

/// Predicate applied to records in memory.
pub type Filter = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Attribute to sort by.
    pub field: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Compare two records by this key. Missing attributes sort as `null`.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = compare_values(
            a.get(&self.field).unwrap_or(&Value::Null),
            b.get(&self.field).unwrap_or(&Value::Null),
        );
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Compare two records by a sequence of keys, later keys breaking ties.
pub fn compare_records(keys: &[SortKey], a: &Record, b: &Record) -> Ordering {
    keys.iter()
        .map(|key| key.compare(a, b))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or_default();
                let y = y.as_f64().unwrap_or_default();
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| compare_values(x, y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A fetch request for records of one entity.
#[derive(Clone)]
pub struct Query {
    pub entity: EntityName,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Vec<SortKey>,
    pub filter: Option<Filter>,
}

impl Query {
    /// All records of an entity, in insertion order.
    pub fn new(entity: EntityName) -> Self {
        Self {
            entity,
            limit: None,
            offset: 0,
            sort: Vec::new(),
            filter: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Append a sort key.
    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn filter(mut self, filter: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Check entity and filter.
    pub fn matches(&self, record: &Record) -> bool {
        record.entity() == &self.entity && self.filter.as_ref().map_or(true, |f| f(record))
    }

    /// Filter, sort and page a set of records.
    ///
    /// Sorting is stable, so records that compare equal keep their input order.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut records: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();
        if !self.sort.is_empty() {
            records.sort_by(|a, b| compare_records(&self.sort, a, b));
        }
        let records = records.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.entity)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("sort", &self.sort)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}
