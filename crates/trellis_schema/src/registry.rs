//! Schema registry.
//!
//! A registry maps definition names to schemas. Each machine validates
//! against the built-in registry composed with its own `schemas` map, so a
//! shape declared once at machine level can be referenced from any number
//! of transitions.

use crate::error::SchemaError;
use indexmap::IndexMap;
use serde_json::{Value, json};

/// Registry of named schema definitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    definitions: IndexMap<String, Value>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            definitions: IndexMap::new(),
        }
    }

    /// Registry holding the built-in definitions
    ///
    /// - `text`: any string
    /// - `json-object`: any object
    /// - `tool-call`: `{name, arguments}` addressed to a tool server
    /// - `tool-calls`: one `tool-call` or a non-empty list of them
    /// - `tool-error`: `{error}` reported back by a tool state
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with_definition("text", json!({"type": "string"}))
            .with_definition("json-object", json!({"type": "object"}))
            .with_definition(
                "tool-call",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "minLength": 1},
                        "arguments": {"type": "object"}
                    },
                    "required": ["name", "arguments"]
                }),
            )
            .with_definition(
                "tool-calls",
                json!({
                    "anyOf": [
                        {"$ref": "#/$defs/tool-call"},
                        {"type": "array", "minItems": 1, "items": {"$ref": "#/$defs/tool-call"}}
                    ]
                }),
            )
            .with_definition(
                "tool-error",
                json!({
                    "type": "object",
                    "properties": {"error": {"type": "string"}},
                    "required": ["error"]
                }),
            )
    }

    /// Add or replace a definition
    #[must_use]
    pub fn with_definition(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.definitions.insert(name.into(), schema);
        self
    }

    /// Compose with local definitions; local entries override existing ones
    #[must_use]
    pub fn compose(&self, local: &IndexMap<String, Value>) -> Self {
        let mut definitions = self.definitions.clone();
        for (name, schema) in local {
            definitions.insert(name.clone(), schema.clone());
        }
        Self { definitions }
    }

    /// Get a definition by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.definitions.get(name)
    }

    /// Check if a definition exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Definition names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Number of definitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Resolve every definition, collecting failures
    ///
    /// Returns the name of each broken definition with its error.
    #[must_use]
    pub fn check(&self) -> Vec<(String, SchemaError)> {
        self.definitions
            .iter()
            .filter_map(|(name, schema)| {
                self.resolve(schema).err().map(|err| (name.clone(), err))
            })
            .collect()
    }
}
