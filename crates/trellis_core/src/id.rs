//! Identifiers for TRELLIS entities.
//!
//! States are named by strings taken from machine documents. Transitions
//! ("xitions") are named by the ordered `(from, to)` pair of their states.
//! Runs and bridges get random UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the sentinel state every machine starts from
pub const START: &str = "start";

/// Name of the sentinel state that terminates a run
pub const END: &str = "end";

/// State identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    /// Create a state identifier from a name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `start` sentinel
    #[must_use]
    pub fn start() -> Self {
        Self(START.to_string())
    }

    /// The `end` sentinel
    #[must_use]
    pub fn end() -> Self {
        Self(END.to_string())
    }

    /// Get the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is the `start` sentinel
    #[must_use]
    pub fn is_start(&self) -> bool {
        self.0 == START
    }

    /// Check if this is the `end` sentinel
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.0 == END
    }

    /// Check if this is either sentinel
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.is_start() || self.is_end()
    }

    /// Derive a namespaced identifier, e.g. `worker` + `tool` = `worker-tool`
    #[must_use]
    pub fn suffixed(&self, suffix: &str) -> Self {
        Self(format!("{}-{}", self.0, suffix))
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Transition identifier - the ordered `(from, to)` pair
///
/// Serialized as a two-element array: `["from", "to"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct XitionId(pub StateId, pub StateId);

impl XitionId {
    /// Create a transition identifier
    #[must_use]
    pub fn new(from: impl Into<StateId>, to: impl Into<StateId>) -> Self {
        Self(from.into(), to.into())
    }

    /// Source state
    #[must_use]
    pub fn from(&self) -> &StateId {
        &self.0
    }

    /// Destination state
    #[must_use]
    pub fn to(&self) -> &StateId {
        &self.1
    }

    /// Check if crossing this transition ends a run
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.1.is_end()
    }

    /// The transition going the opposite way
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(self.1.clone(), self.0.clone())
    }
}

impl std::fmt::Display for XitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} -> {}]", self.0, self.1)
    }
}

/// Run identifier - identifies a single machine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// Bridge identifier - identifies one tool-server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BridgeId(Uuid);

impl BridgeId {
    /// Create a new random BridgeId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bridge_{}", self.0)
    }
}
