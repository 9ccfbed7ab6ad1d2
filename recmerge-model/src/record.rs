use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Primary key of a stored record.
///
/// Integer keys cover auto-increment tables; string keys cover UUID or
/// natural-key tables. Serialized untagged so it round-trips through the
/// attribute map unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Str(String),
}

impl RecordKey {
    /// Reads a key out of a JSON value. Returns `None` for null, floats,
    /// booleans, arrays and objects.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// The key as a JSON value, suitable for filters and assignments.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// A single stored row of some entity type.
///
/// All merge input flows through this type. The `attributes` map holds every
/// column of the row, the primary key included, exactly as the store
/// returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_type: String,
    pub key: RecordKey,
    pub attributes: Map<String, Value>,
}

impl Record {
    pub fn new(entity_type: impl Into<String>, key: RecordKey, attributes: Map<String, Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
            attributes,
        }
    }

    /// Returns the attribute value, or `None` when the attribute is absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns the attribute value, mapping absent attributes to `Value::Null`.
    pub fn get_or_null(&self, name: &str) -> Value {
        self.attributes.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Extract a string attribute.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    /// Extract an integer attribute.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(|v| v.as_i64())
    }

    /// True when the attribute is absent or JSON `null`.
    pub fn is_null(&self, name: &str) -> bool {
        self.attributes.get(name).is_none_or(is_null)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// Attribute names in storage order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// True when the value is JSON `null`.
pub fn is_null(value: &Value) -> bool {
    value.is_null()
}

/// The identity that requested a merge.
///
/// Carried through to loggers and events; the engine never authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}
