//! Events submitted to a running machine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trellis_core::XitionId;

/// Event crossing a xition
///
/// `message` is the document validated against the xition's schema. Any
/// other top-level fields are carried along unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Xition this event requests
    pub id: XitionId,
    /// Payload checked against the xition schema
    #[serde(default)]
    pub message: Value,
    /// Extra fields, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Create an event
    #[must_use]
    pub fn new(id: XitionId, message: Value) -> Self {
        Self {
            id,
            message,
            extra: Map::new(),
        }
    }

    /// Add an extra field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Get an extra field
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
