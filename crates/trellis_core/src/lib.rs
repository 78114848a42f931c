//! TRELLIS Core Types
//!
//! Identifiers and errors shared by every TRELLIS crate.
//! This crate performs no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{BridgeId, RunId, StateId, XitionId};
