use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single user document.
///
/// Records are schema-free: the dashboard only reads `age` and `country`,
/// every other field passes through untouched. The store's internal
/// identity field is stripped on construction and never exposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Name of the store-internal identity field.
    pub const IDENTITY_FIELD: &'static str = "_id";

    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns a field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the numeric `age`, if present and finite.
    pub fn age(&self) -> Option<f64> {
        self.0
            .get("age")
            .and_then(Value::as_f64)
            .filter(|age| age.is_finite())
    }

    /// Returns the `country` string, if present.
    pub fn country(&self) -> Option<&str> {
        self.0.get("country").and_then(Value::as_str)
    }

    /// Number of fields in this record.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the record back into a JSON document.
    pub fn into_document(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for Record {
    type Error = NotAnObject;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(mut map) => {
                map.remove(Self::IDENTITY_FIELD);
                Ok(Self(map))
            }
            other => Err(NotAnObject {
                found: json_kind(&other),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Record::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(mut map: Map<String, Value>) -> Self {
        map.remove(Self::IDENTITY_FIELD);
        Self(map)
    }
}

/// Returned when a stored document is not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAnObject {
    pub found: &'static str,
}

impl std::fmt::Display for NotAnObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected a JSON object, found {}", self.found)
    }
}

impl std::error::Error for NotAnObject {}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Notification that the users collection was mutated.
///
/// Only the occurrence matters. The operation name, when the store provides
/// one, is kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    operation: Option<String>,
}

impl ChangeEvent {
    /// Creates a change event with no operation detail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a change event tagged with the mutating operation.
    pub fn with_operation(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
        }
    }

    /// The mutating operation (`INSERT`, `DELETE`, ...), if known.
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }
}
