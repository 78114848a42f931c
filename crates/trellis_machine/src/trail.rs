//! Append-only trail of a run.
//!
//! Every submitted event leaves exactly one record: a traversal (with `to`)
//! when the event was accepted, a failure (with `failure`) when it was not.
//! Records are never rewritten or removed.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use trellis_core::StateId;
use trellis_schema::Violation;

/// Why an event was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Message violated the xition schema
    Validation,
    /// Event named a xition the machine does not have
    UnknownXition,
    /// Xition schema could not be produced or compiled
    Schema,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::UnknownXition => write!(f, "unknown-xition"),
            Self::Schema => write!(f, "schema"),
        }
    }
}

/// Rejection details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure class
    pub kind: FailureKind,
    /// Individual violations
    pub errors: Vec<Violation>,
    /// Attempt number of the producing action (1-based)
    #[serde(rename = "attempt-number")]
    pub attempt: u32,
}

impl Failure {
    /// Failure carrying a single root-level message
    #[must_use]
    pub fn message(kind: FailureKind, message: impl Into<String>, attempt: u32) -> Self {
        Self {
            kind,
            errors: vec![Violation {
                path: String::new(),
                schema_path: String::new(),
                message: message.into(),
            }],
            attempt,
        }
    }

    /// One line per violation, for feeding back to a producer
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// One trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRecord {
    /// Machine identifier
    #[serde(rename = "machine-id")]
    pub machine_id: String,
    /// Machine version
    #[serde(rename = "machine-version")]
    pub machine_version: String,
    /// State the event left
    pub from: StateId,
    /// State the event entered (absent on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<StateId>,
    /// The event as submitted
    pub event: Event,
    /// Rejection details (absent on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl TrailRecord {
    /// Check if this record is a successful traversal
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ordered run history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trail {
    records: Vec<TrailRecord>,
}

impl Trail {
    /// Create an empty trail
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a trail from records of an earlier run
    #[must_use]
    pub fn from_records(records: Vec<TrailRecord>) -> Self {
        Self { records }
    }

    /// Append a record
    pub fn push(&mut self, record: TrailRecord) {
        self.records.push(record);
    }

    /// All records in order
    #[must_use]
    pub fn records(&self) -> &[TrailRecord] {
        &self.records
    }

    /// Iterate over records
    pub fn iter(&self) -> impl Iterator<Item = &TrailRecord> {
        self.records.iter()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if trail is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record
    #[must_use]
    pub fn last(&self) -> Option<&TrailRecord> {
        self.records.last()
    }

    /// Successful traversals in order
    pub fn successes(&self) -> impl Iterator<Item = &TrailRecord> {
        self.records.iter().filter(|r| r.is_success())
    }

    /// Failure records in order
    pub fn failures(&self) -> impl Iterator<Item = &TrailRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }

    /// State reached by the last successful traversal
    #[must_use]
    pub fn current_state(&self) -> Option<&StateId> {
        self.successes().last().and_then(|r| r.to.as_ref())
    }

    /// Check that successive traversals connect
    ///
    /// For every pair of successful records `(a, b)`, `b.from == a.to`.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        let mut successes = self.successes();
        let Some(mut previous) = successes.next() else {
            return true;
        };
        for record in successes {
            if previous.to.as_ref() != Some(&record.from) {
                return false;
            }
            previous = record;
        }
        true
    }

    /// Render the trail as conversation lines for a prompt
    ///
    /// Accepted events read as `from -> to: message`; rejected ones add the
    /// violations so a producer can see what it got wrong.
    #[must_use]
    pub fn prompt_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| match (&record.to, &record.failure) {
                (Some(to), _) => format!("{} -> {}: {}", record.from, to, record.event.message),
                (None, Some(failure)) => format!(
                    "{} rejected ({}, attempt {}): {} [{}]",
                    record.event.id,
                    failure.kind,
                    failure.attempt,
                    record.event.message,
                    failure.summary()
                ),
                (None, None) => format!("{}: {}", record.event.id, record.event.message),
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a Trail {
    type Item = &'a TrailRecord;
    type IntoIter = std::slice::Iter<'a, TrailRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
