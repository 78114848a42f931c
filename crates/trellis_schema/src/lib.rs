//! TRELLIS Schema System
//!
//! Every transition of a machine is guarded by a schema. Schemas are JSON
//! Schema documents that may point into a registry with `$ref`; the registry
//! is a fixed set of built-in definitions composed with a machine's local
//! definitions. References are resolved recursively before validation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod registry;
pub mod resolve;
pub mod schema;
pub mod validate;

pub use error::{SchemaError, SchemaResult};
pub use registry::Registry;
pub use resolve::RefTarget;
pub use schema::SchemaSource;
pub use validate::{CompiledSchema, Validation, Violation, validate};
