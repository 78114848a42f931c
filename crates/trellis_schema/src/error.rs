//! Schema errors.

/// Schema result type
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while preparing a schema for validation
///
/// A document failing validation is not an error; see
/// [`Validation`](crate::Validation).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// `$ref` names a definition the registry does not hold
    #[error("Unresolved reference: {reference}")]
    UnresolvedRef {
        /// The reference as written
        reference: String,
    },

    /// `$ref` chain loops back on itself
    #[error("Cyclic reference: {}", chain.join(" -> "))]
    CyclicRef {
        /// References followed, ending with the repeated one
        chain: Vec<String>,
    },

    /// Remote or root-relative references are not supported
    #[error("Unsupported reference: {reference}")]
    UnsupportedRef {
        /// The reference as written
        reference: String,
    },

    /// `$ref` value is not a string
    #[error("Invalid reference: {reference}")]
    InvalidRef {
        /// The offending value, JSON encoded
        reference: String,
    },

    /// Resolved schema could not be compiled
    #[error("Invalid schema: {reason}")]
    InvalidSchema {
        /// Compiler message
        reason: String,
    },
}
