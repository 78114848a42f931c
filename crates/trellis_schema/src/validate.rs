//! Document validation against resolved schemas.

use crate::error::{SchemaError, SchemaResult};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One way in which a document violates a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer to the offending part of the document
    pub path: String,
    /// JSON pointer to the schema keyword that failed
    pub schema_path: String,
    /// Human readable description
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// Outcome of validating a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Document conforms
    Valid,
    /// Document violates the schema
    Invalid(Vec<Violation>),
}

impl Validation {
    /// Check if the document conforms
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Violations (empty when valid)
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid => &[],
            Self::Invalid(violations) => violations,
        }
    }
}

/// A schema with its references resolved and compiled for repeated use
pub struct CompiledSchema {
    resolved: Value,
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    /// Resolve and compile a schema against a registry
    ///
    /// # Errors
    ///
    /// Returns error if references cannot be resolved or the resolved
    /// schema is not a valid JSON Schema.
    pub fn compile(schema: &Value, registry: &Registry) -> SchemaResult<Self> {
        let resolved = registry.resolve(schema)?;
        let validator =
            jsonschema::Validator::new(&resolved).map_err(|e| SchemaError::InvalidSchema {
                reason: e.to_string(),
            })?;
        Ok(Self { resolved, validator })
    }

    /// The fully inlined schema
    #[must_use]
    pub fn resolved(&self) -> &Value {
        &self.resolved
    }

    /// Validate a document
    #[must_use]
    pub fn check(&self, document: &Value) -> Validation {
        if self.validator.is_valid(document) {
            return Validation::Valid;
        }
        let violations = self
            .validator
            .iter_errors(document)
            .map(|error| Violation {
                path: error.instance_path.to_string(),
                schema_path: error.schema_path.to_string(),
                message: error.to_string(),
            })
            .collect();
        Validation::Invalid(violations)
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

/// Validate a document against a schema, resolving `$ref`s in `registry`
///
/// # Errors
///
/// Returns error if the schema itself is unusable. A non-conforming
/// document is reported as [`Validation::Invalid`], not as an error.
pub fn validate(document: &Value, schema: &Value, registry: &Registry) -> SchemaResult<Validation> {
    let compiled = CompiledSchema::compile(schema, registry)?;
    let outcome = compiled.check(document);
    if let Validation::Invalid(violations) = &outcome {
        tracing::debug!(violations = violations.len(), "document rejected by schema");
    }
    Ok(outcome)
}
