//! Attribute kinds and property descriptions for entity definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{EntityName, RelationshipValue};

/// Value kinds an attribute can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// Text.
    String,
    /// Whole numbers (i64/u64).
    Integer,
    /// Floating point numbers, integers are accepted too.
    Double,
    /// Boolean values.
    Boolean,
    /// Timestamps, stored as RFC 3339 strings.
    Date,
    /// Arbitrary JSON objects or arrays.
    Json,
}

impl AttributeKind {
    /// Check if a JSON value matches this kind. `null` never matches.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (AttributeKind::String, Value::String(_)) => true,
            (AttributeKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (AttributeKind::Double, Value::Number(_)) => true,
            (AttributeKind::Boolean, Value::Bool(_)) => true,
            (AttributeKind::Date, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            (AttributeKind::Json, Value::Object(_) | Value::Array(_)) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttributeKind::String => "string",
            AttributeKind::Integer => "integer",
            AttributeKind::Double => "double",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Date => "date",
            AttributeKind::Json => "json",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A scalar property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    /// Attribute name.
    pub name: String,
    /// Value kind.
    pub kind: AttributeKind,
    /// Whether `null` (or absence) is allowed.
    #[serde(default)]
    pub optional: bool,
    /// Value assigned to freshly inserted records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AttributeDescription {
    /// Create a required attribute.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            default: None,
        }
    }

    /// Allow `null` values.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Validate a value against this attribute.
    pub fn validate(&self, value: Option<&Value>) -> Result<(), String> {
        match value {
            None | Some(Value::Null) => {
                if self.optional {
                    Ok(())
                } else {
                    Err(format!("attribute '{}' cannot be null", self.name))
                }
            }
            Some(v) if self.kind.matches(v) => Ok(()),
            Some(v) => Err(format!(
                "attribute '{}' expects {}, got {}",
                self.name, self.kind, v
            )),
        }
    }
}

/// A reference from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescription {
    /// Relationship name.
    pub name: String,
    /// Entity on the other side.
    pub destination: EntityName,
    /// To-many relationships hold an ordered list of identifiers.
    #[serde(default)]
    pub to_many: bool,
    /// Name of the relationship on the destination pointing back here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl RelationshipDescription {
    pub fn to_one(name: impl Into<String>, destination: EntityName) -> Self {
        Self {
            name: name.into(),
            destination,
            to_many: false,
            inverse: None,
        }
    }

    pub fn to_many(name: impl Into<String>, destination: EntityName) -> Self {
        Self {
            name: name.into(),
            destination,
            to_many: true,
            inverse: None,
        }
    }

    /// Set the inverse relationship name.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// The value a new record starts with.
    pub fn empty_value(&self) -> RelationshipValue {
        if self.to_many {
            RelationshipValue::ToMany(Vec::new())
        } else {
            RelationshipValue::ToOne(None)
        }
    }

    /// Check if a stored value has the right cardinality.
    pub fn accepts(&self, value: &RelationshipValue) -> bool {
        matches!(
            (self.to_many, value),
            (true, RelationshipValue::ToMany(_)) | (false, RelationshipValue::ToOne(_))
        )
    }
}
