//! `$ref` resolution.
//!
//! References are inlined recursively: a definition fetched through one
//! `$ref` may contain further references, which are followed in turn. The
//! chain of references currently being expanded is tracked so that a loop
//! is reported instead of recursing forever.

use crate::error::{SchemaError, SchemaResult};
use crate::registry::Registry;
use serde_json::{Map, Value};

/// Keywords whose values are instance data, not subschemas
const DATA_KEYWORDS: &[&str] = &["const", "enum", "default", "examples"];

/// Keywords holding embedded definitions
const DEFS_KEYWORDS: &[&str] = &["$defs", "definitions"];

/// Keywords whose value maps arbitrary names to subschemas
const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
];

/// Parsed `$ref` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    /// Definition name in the registry
    pub name: String,
    /// JSON pointer into the definition (empty for the whole definition)
    pub pointer: String,
}

impl RefTarget {
    /// Parse a reference
    ///
    /// Accepted forms are `#/$defs/<name>[/pointer]`,
    /// `#/definitions/<name>[/pointer]` and a bare `<name>`.
    ///
    /// # Errors
    ///
    /// Returns error for remote references and pointers into the document
    /// root.
    pub fn parse(reference: &str) -> SchemaResult<Self> {
        let unsupported = || SchemaError::UnsupportedRef {
            reference: reference.to_string(),
        };

        if reference.contains("://") || reference.ends_with(".json") {
            return Err(unsupported());
        }

        let local = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"));

        match local {
            Some(rest) => {
                let (name, pointer) = match rest.find('/') {
                    Some(split) => (&rest[..split], &rest[split..]),
                    None => (rest, ""),
                };
                if name.is_empty() {
                    return Err(unsupported());
                }
                Ok(Self {
                    name: unescape(name),
                    pointer: pointer.to_string(),
                })
            }
            None if reference.starts_with('#') || reference.is_empty() => Err(unsupported()),
            None => Ok(Self {
                name: reference.to_string(),
                pointer: String::new(),
            }),
        }
    }

    /// Canonical form used for cycle tracking
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("#/$defs/{}{}", escape(&self.name), self.pointer)
    }
}

impl std::fmt::Display for RefTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

impl Registry {
    /// Inline every `$ref` in a schema
    ///
    /// Definitions embedded in the schema's own top-level `$defs` (or
    /// `definitions`) are visible to its references and take precedence
    /// over the registry. A `$ref` with sibling keywords becomes
    /// `{"allOf": [resolved, siblings]}`.
    ///
    /// # Errors
    ///
    /// Returns error if a reference is unknown, unsupported or cyclic.
    pub fn resolve(&self, schema: &Value) -> SchemaResult<Value> {
        let embedded = embedded_definitions(schema);
        let mut chain = Vec::new();

        match embedded {
            Some(defs) => {
                let scoped = self.compose(&defs);
                let stripped = strip_definitions(schema);
                scoped.resolve_node(&stripped, &mut chain)
            }
            None => self.resolve_node(schema, &mut chain),
        }
    }

    /// Collect the canonical names of references a schema uses directly
    ///
    /// References inside fetched definitions are not followed.
    #[must_use]
    pub fn refs(schema: &Value) -> Vec<String> {
        let mut out = Vec::new();
        collect_refs(schema, &mut out);
        out
    }

    fn resolve_node(&self, schema: &Value, chain: &mut Vec<String>) -> SchemaResult<Value> {
        match schema {
            Value::Object(map) => match map.get("$ref") {
                Some(reference) => self.resolve_ref(reference, map, chain),
                None => self.resolve_keywords(map, chain).map(Value::Object),
            },
            other => Ok(other.clone()),
        }
    }

    /// Resolve every keyword of a schema object except `$ref`
    fn resolve_keywords(
        &self,
        map: &Map<String, Value>,
        chain: &mut Vec<String>,
    ) -> SchemaResult<Map<String, Value>> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map.iter().filter(|(key, _)| key.as_str() != "$ref") {
            out.insert(key.clone(), self.resolve_keyword(key, value, chain)?);
        }
        Ok(out)
    }

    fn resolve_keyword(&self, key: &str, value: &Value, chain: &mut Vec<String>) -> SchemaResult<Value> {
        if DATA_KEYWORDS.contains(&key) {
            return Ok(value.clone());
        }
        match value {
            Value::Object(entries) if SCHEMA_MAP_KEYWORDS.contains(&key) => {
                let mut out = Map::with_capacity(entries.len());
                for (name, schema) in entries {
                    out.insert(name.clone(), self.resolve_node(schema, chain)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_node(item, chain))
                .collect::<SchemaResult<Vec<_>>>()
                .map(Value::Array),
            other => self.resolve_node(other, chain),
        }
    }

    fn resolve_ref(
        &self,
        reference: &Value,
        map: &Map<String, Value>,
        chain: &mut Vec<String>,
    ) -> SchemaResult<Value> {
        let reference = reference.as_str().ok_or_else(|| SchemaError::InvalidRef {
            reference: reference.to_string(),
        })?;
        let target = RefTarget::parse(reference)?;
        let key = target.canonical();

        if chain.contains(&key) {
            let mut looped = chain.clone();
            looped.push(key);
            return Err(SchemaError::CyclicRef { chain: looped });
        }

        let fetched = self.lookup(&target).ok_or_else(|| SchemaError::UnresolvedRef {
            reference: reference.to_string(),
        })?;

        chain.push(key);
        let resolved = self.resolve_node(fetched, chain);
        chain.pop();
        let resolved = resolved?;

        let siblings = self.resolve_keywords(map, chain)?;

        if siblings.is_empty() {
            Ok(resolved)
        } else {
            Ok(serde_json::json!({ "allOf": [resolved, Value::Object(siblings)] }))
        }
    }

    fn lookup(&self, target: &RefTarget) -> Option<&Value> {
        let definition = self.get(&target.name)?;
        if target.pointer.is_empty() {
            Some(definition)
        } else {
            definition.pointer(&target.pointer)
        }
    }
}

fn embedded_definitions(schema: &Value) -> Option<indexmap::IndexMap<String, Value>> {
    let map = schema.as_object()?;
    let mut defs = indexmap::IndexMap::new();
    for keyword in DEFS_KEYWORDS {
        if let Some(Value::Object(embedded)) = map.get(*keyword) {
            defs.extend(embedded.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    if defs.is_empty() { None } else { Some(defs) }
}

fn strip_definitions(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !DEFS_KEYWORDS.contains(&key.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn collect_refs(schema: &Value, out: &mut Vec<String>) {
    let Value::Object(map) = schema else {
        return;
    };
    for (key, value) in map {
        if key == "$ref" {
            if let Some(reference) = value.as_str() {
                out.push(reference.to_string());
            }
        } else if DATA_KEYWORDS.contains(&key.as_str()) {
            continue;
        } else {
            match value {
                Value::Object(entries) if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) => {
                    entries.values().for_each(|entry| collect_refs(entry, out));
                }
                Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
                other => collect_refs(other, out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new()
            .with_definition("name", json!({"type": "string", "minLength": 1}))
            .with_definition(
                "person",
                json!({
                    "type": "object",
                    "properties": {"name": {"$ref": "#/$defs/name"}},
                    "required": ["name"]
                }),
            )
            .with_definition(
                "team",
                json!({
                    "type": "array",
                    "items": {"$ref": "#/$defs/person"}
                }),
            )
    }

    #[test]
    fn test_parse_defs_ref() {
        let target = RefTarget::parse("#/$defs/person").unwrap();
        assert_eq!(target.name, "person");
        assert!(target.pointer.is_empty());
    }

    #[test]
    fn test_parse_ref_with_pointer() {
        let target = RefTarget::parse("#/definitions/person/properties/name").unwrap();
        assert_eq!(target.name, "person");
        assert_eq!(target.pointer, "/properties/name");
    }

    #[test]
    fn test_parse_bare_name() {
        let target = RefTarget::parse("person").unwrap();
        assert_eq!(target.canonical(), "#/$defs/person");
    }

    #[test]
    fn test_parse_rejects_remote_and_root() {
        assert!(RefTarget::parse("https://example.com/s.json").is_err());
        assert!(RefTarget::parse("#/properties/a").is_err());
        assert!(RefTarget::parse("#").is_err());
        assert!(RefTarget::parse("#/$defs/").is_err());
    }

    #[test]
    fn test_resolve_nested_refs() {
        let resolved = registry().resolve(&json!({"$ref": "#/$defs/team"})).unwrap();
        assert_eq!(
            resolved,
            json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"name": {"type": "string", "minLength": 1}},
                    "required": ["name"]
                }
            })
        );
    }

    #[test]
    fn test_resolve_ref_with_pointer() {
        let resolved = registry()
            .resolve(&json!({"$ref": "#/$defs/person/properties/name"}))
            .unwrap();
        assert_eq!(resolved, json!({"type": "string", "minLength": 1}));
    }

    #[test]
    fn test_resolve_ref_with_siblings() {
        let resolved = registry()
            .resolve(&json!({"$ref": "name", "maxLength": 5}))
            .unwrap();
        assert_eq!(
            resolved,
            json!({"allOf": [{"type": "string", "minLength": 1}, {"maxLength": 5}]})
        );
    }

    #[test]
    fn test_resolve_same_ref_twice_is_not_a_cycle() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"$ref": "#/$defs/person"},
                "b": {"$ref": "#/$defs/person"}
            }
        });
        assert!(registry().resolve(&schema).is_ok());
    }

    #[test]
    fn test_resolve_detects_cycle() {
        let registry = Registry::new()
            .with_definition("a", json!({"$ref": "#/$defs/b"}))
            .with_definition("b", json!({"type": "array", "items": {"$ref": "#/$defs/a"}}));

        let err = registry.resolve(&json!({"$ref": "a"})).unwrap_err();
        assert_eq!(
            err,
            SchemaError::CyclicRef {
                chain: vec![
                    "#/$defs/a".to_string(),
                    "#/$defs/b".to_string(),
                    "#/$defs/a".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_resolve_unknown_ref() {
        let err = registry()
            .resolve(&json!({"properties": {"x": {"$ref": "#/$defs/ghost"}}}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedRef { .. }));
    }

    #[test]
    fn test_resolve_embedded_defs_shadow_registry() {
        let schema = json!({
            "$defs": {"name": {"type": "integer"}},
            "$ref": "#/$defs/person"
        });
        let resolved = registry().resolve(&schema).unwrap();
        assert_eq!(resolved["properties"]["name"], json!({"type": "integer"}));
    }

    #[test]
    fn test_resolve_leaves_const_data_alone() {
        let schema = json!({"const": {"$ref": "not-a-ref"}});
        assert_eq!(registry().resolve(&schema).unwrap(), schema);
    }

    #[test]
    fn test_resolve_properties_named_like_keywords() {
        let schema = json!({
            "type": "object",
            "properties": {
                "default": {"$ref": "#/$defs/text"},
                "enum": {"$ref": "name"},
                "$ref": {"type": "string"}
            },
            "patternProperties": {"^const": {"$ref": "#/$defs/json-object"}}
        });
        let registry = Registry::builtin().with_definition("name", json!({"type": "string", "minLength": 1}));
        let resolved = registry.resolve(&schema).unwrap();
        assert_eq!(
            resolved,
            json!({
                "type": "object",
                "properties": {
                    "default": {"type": "string"},
                    "enum": {"type": "string", "minLength": 1},
                    "$ref": {"type": "string"}
                },
                "patternProperties": {"^const": {"type": "object"}}
            })
        );
    }

    #[test]
    fn test_resolved_keyword_named_properties_validate() {
        let registry = Registry::builtin();
        let schema = json!({
            "type": "object",
            "properties": {"default": {"$ref": "#/$defs/text"}, "$ref": {"type": "integer"}}
        });
        let good = crate::validate(&json!({"default": "x", "$ref": 1}), &schema, &registry).unwrap();
        assert!(good.is_valid());
        let bad = crate::validate(&json!({"default": 3}), &schema, &registry).unwrap();
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_refs_collects_direct_references() {
        let refs = Registry::refs(&json!({
            "anyOf": [{"$ref": "#/$defs/a"}, {"items": {"$ref": "b"}}],
            "const": {"$ref": "ignored"},
            "properties": {"$ref": {"type": "string"}, "const": {"$ref": "c"}}
        }));
        assert_eq!(
            refs,
            vec!["#/$defs/a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
