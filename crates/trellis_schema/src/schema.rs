//! Where a transition's schema comes from.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Schema bound to a transition
///
/// Document form:
/// - a JSON string is a dynamic lookup key (`"worker-request"`)
/// - an object holding only `{"$ref": "#/$defs/<name>"}` is a local reference
/// - anything else is a literal schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum SchemaSource {
    /// Inline schema (may still contain nested `$ref`s)
    Literal(Value),
    /// Reference to a machine-level definition
    Local(String),
    /// Key into the context's schema-provider table
    Dynamic(String),
}

impl SchemaSource {
    /// Schema accepting any document
    #[must_use]
    pub fn any() -> Self {
        Self::Literal(Value::Bool(true))
    }

    /// Create a literal schema
    #[must_use]
    pub fn literal(schema: Value) -> Self {
        Self::from(schema)
    }

    /// Create a local reference
    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    /// Create a dynamic lookup key
    #[must_use]
    pub fn dynamic(key: impl Into<String>) -> Self {
        Self::Dynamic(key.into())
    }

    /// Schema document for the static variants
    ///
    /// Dynamic sources have no document until their provider is called.
    #[must_use]
    pub fn as_static(&self) -> Option<Value> {
        match self {
            Self::Literal(schema) => Some(schema.clone()),
            Self::Local(name) => Some(local_ref(name)),
            Self::Dynamic(_) => None,
        }
    }

    /// Check if this source needs a provider
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

impl Default for SchemaSource {
    fn default() -> Self {
        Self::any()
    }
}

fn local_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/$defs/{}", name) })
}

impl From<Value> for SchemaSource {
    fn from(value: Value) -> Self {
        if let Value::String(key) = value {
            return Self::Dynamic(key);
        }
        match local_ref_name(&value) {
            Some(name) => Self::Local(name),
            None => Self::Literal(value),
        }
    }
}

fn local_ref_name(value: &Value) -> Option<String> {
    let map = value.as_object().filter(|map| map.len() == 1)?;
    map.get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix("#/$defs/"))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .map(str::to_string)
}

impl From<SchemaSource> for Value {
    fn from(source: SchemaSource) -> Self {
        match source {
            SchemaSource::Literal(schema) => schema,
            SchemaSource::Local(name) => local_ref(&name),
            SchemaSource::Dynamic(key) => Value::String(key),
        }
    }
}
