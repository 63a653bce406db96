//! Record format.
//!
//! A record is one stored instance of an entity. Attribute values are JSON
//! values, relationships hold identifiers of other records. Records are
//! persisted as a single JSON document:
//! ```text
//! {
//!   "_id": "01hv6z...",
//!   "_entity": "Book",
//!   "_relationships": { "author": "01hv70..." },
//!   "title": "Dune",
//!   "year": 1965
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{EntityName, ObjectId};

/// Value of a relationship on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipValue {
    /// At most one related record.
    ToOne(Option<ObjectId>),
    /// Ordered list of related records.
    ToMany(Vec<ObjectId>),
}

impl RelationshipValue {
    /// All identifiers this value references, in order.
    pub fn ids(&self) -> Vec<ObjectId> {
        match self {
            RelationshipValue::ToOne(id) => id.iter().cloned().collect(),
            RelationshipValue::ToMany(ids) => ids.clone(),
        }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        match self {
            RelationshipValue::ToOne(current) => current.as_ref() == Some(id),
            RelationshipValue::ToMany(ids) => ids.contains(id),
        }
    }

    /// Add a reference. A to-one value is overwritten.
    pub fn insert(&mut self, id: ObjectId) {
        match self {
            RelationshipValue::ToOne(current) => *current = Some(id),
            RelationshipValue::ToMany(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }

    /// Drop a reference if present.
    pub fn remove(&mut self, id: &ObjectId) {
        match self {
            RelationshipValue::ToOne(current) => {
                if current.as_ref() == Some(id) {
                    *current = None;
                }
            }
            RelationshipValue::ToMany(ids) => ids.retain(|i| i != id),
        }
    }
}

/// A stored entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: ObjectId,
    entity: EntityName,
    attributes: BTreeMap<String, Value>,
    relationships: BTreeMap<String, RelationshipValue>,
}

impl Record {
    /// Create an empty record.
    pub fn new(id: ObjectId, entity: EntityName) -> Self {
        Self {
            id,
            entity,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    /// Get an attribute value by name.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }

    pub fn get_i64(&self, attribute: &str) -> Option<i64> {
        self.get(attribute).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, attribute: &str) -> Option<f64> {
        self.get(attribute).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, attribute: &str) -> Option<bool> {
        self.get(attribute).and_then(Value::as_bool)
    }

    /// Set an attribute value.
    pub fn set(&mut self, attribute: impl Into<String>, value: Value) {
        self.attributes.insert(attribute.into(), value);
    }

    /// Remove an attribute value.
    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.attributes.remove(attribute)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Get a relationship value by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    pub(crate) fn relationship_mut(&mut self, name: &str) -> Option<&mut RelationshipValue> {
        self.relationships.get_mut(name)
    }

    /// Identifier held by a to-one relationship.
    pub fn to_one(&self, name: &str) -> Option<&ObjectId> {
        match self.relationships.get(name) {
            Some(RelationshipValue::ToOne(id)) => id.as_ref(),
            _ => None,
        }
    }

    /// Identifiers held by a to-many relationship.
    pub fn to_many(&self, name: &str) -> &[ObjectId] {
        match self.relationships.get(name) {
            Some(RelationshipValue::ToMany(ids)) => ids,
            _ => &[],
        }
    }

    /// Identifiers referenced by a relationship of either cardinality.
    pub fn related_ids(&self, name: &str) -> Vec<ObjectId> {
        self.relationships
            .get(name)
            .map(RelationshipValue::ids)
            .unwrap_or_default()
    }

    /// Set a relationship value.
    pub fn set_relationship(&mut self, name: impl Into<String>, value: RelationshipValue) {
        self.relationships.insert(name.into(), value);
    }

    pub fn relationships(&self) -> &BTreeMap<String, RelationshipValue> {
        &self.relationships
    }
}

/// internal format for JSON serialization
///
/// uses `_` prefix for bookkeeping fields to avoid conflicts with attributes
#[derive(Serialize, Deserialize)]
struct RecordJson {
    #[serde(rename = "_id")]
    id: ObjectId,
    #[serde(rename = "_entity")]
    entity: EntityName,
    #[serde(rename = "_relationships", default)]
    relationships: BTreeMap<String, RelationshipValue>,
    #[serde(flatten)]
    attributes: BTreeMap<String, Value>,
}

/// serialize a record to JSON text
pub(crate) fn serialize_record(record: &Record) -> StorageResult<String> {
    let json = RecordJson {
        id: record.id.clone(),
        entity: record.entity.clone(),
        relationships: record.relationships.clone(),
        attributes: record.attributes.clone(),
    };
    Ok(serde_json::to_string(&json)?)
}

/// deserialize a record from JSON text
pub(crate) fn deserialize_record(data: &str) -> StorageResult<Record> {
    let json: RecordJson = serde_json::from_str(data)?;

    if let Some(key) = json.attributes.keys().find(|k| k.starts_with('_')) {
        return Err(StorageError::CorruptedData {
            id: json.id.to_string(),
            reason: format!("unexpected bookkeeping field '{}'", key),
        });
    }

    Ok(Record {
        id: json.id,
        entity: json.entity,
        attributes: json.attributes,
        relationships: json.relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book() -> Record {
        let mut record = Record::new(
            ObjectId::new("book1").unwrap(),
            EntityName::new("Book").unwrap(),
        );
        record.set("title", json!("Dune"));
        record.set("year", json!(1965));
        record.set_relationship(
            "author",
            RelationshipValue::ToOne(Some(ObjectId::new("author1").unwrap())),
        );
        record
    }

    #[test]
    fn test_record_accessors() {
        let record = book();
        assert_eq!(record.get_str("title"), Some("Dune"));
        assert_eq!(record.get_i64("year"), Some(1965));
        assert_eq!(record.get_bool("title"), None);
        assert_eq!(record.to_one("author").map(ObjectId::as_str), Some("author1"));
        assert!(record.to_many("author").is_empty());
        assert_eq!(record.related_ids("author").len(), 1);
    }

    #[test]
    fn test_record_json_format() {
        let record = book();
        let text = serialize_record(&record).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["_id"], "book1");
        assert_eq!(value["_entity"], "Book");
        assert_eq!(value["_relationships"]["author"], "author1");
        assert_eq!(value["title"], "Dune");

        assert_eq!(deserialize_record(&text).unwrap(), record);
    }

    #[test]
    fn test_relationship_value_shapes() {
        let empty: RelationshipValue = serde_json::from_str("null").unwrap();
        assert_eq!(empty, RelationshipValue::ToOne(None));

        let many: RelationshipValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(many.ids().len(), 2);
    }

    #[test]
    fn test_relationship_value_edit() {
        let a = ObjectId::new("a").unwrap();
        let b = ObjectId::new("b").unwrap();

        let mut many = RelationshipValue::ToMany(vec![]);
        many.insert(a.clone());
        many.insert(b.clone());
        many.insert(a.clone());
        assert_eq!(many.ids(), vec![a.clone(), b.clone()]);
        many.remove(&a);
        assert_eq!(many.ids(), vec![b.clone()]);

        let mut one = RelationshipValue::ToOne(Some(a.clone()));
        one.remove(&b);
        assert!(one.contains(&a));
        one.insert(b.clone());
        assert!(one.contains(&b));
    }

    #[test]
    fn test_deserialize_rejects_unknown_bookkeeping() {
        let text = r#"{"_id": "x", "_entity": "Book", "_version": 3}"#;
        assert!(matches!(
            deserialize_record(text),
            Err(StorageError::CorruptedData { .. })
        ));
    }
}
