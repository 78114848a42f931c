//! Bridge errors.

use crate::protocol::{Request, RpcError};
use serde_json::Value;
use std::time::Duration;

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Configuration is unusable
    #[error("Invalid bridge config: {reason}")]
    Config {
        /// What is wrong
        reason: String,
    },

    /// Server process could not be started
    #[error("Failed to spawn {command}: {reason}")]
    Spawn {
        /// Command line
        command: String,
        /// OS error
        reason: String,
    },

    /// Handshake did not complete; the server process has been stopped
    #[error("Handshake failed during {stage}: {reason}")]
    Handshake {
        /// `initialize`, `initialized` or `tools/list`
        stage: String,
        /// Underlying failure
        reason: String,
    },

    /// No response within the deadline
    #[error("Request {} ({}) timed out after {:?}", request.id, request.method, after)]
    Timeout {
        /// The request as sent
        request: Request,
        /// Deadline that passed
        after: Duration,
    },

    /// Server answered with a JSON-RPC error
    #[error("{method} failed: {error}")]
    Rpc {
        /// Request method
        method: String,
        /// Server error
        error: RpcError,
    },

    /// Tool reported a failure
    #[error("Tool {tool} failed: {error}")]
    ToolCallFailed {
        /// Tool name
        tool: String,
        /// Arguments it was called with
        arguments: Value,
        /// Server's error message
        error: String,
    },

    /// Malformed traffic
    #[error("Protocol error: {reason}")]
    Protocol {
        /// What was wrong
        reason: String,
    },

    /// Bridge is shut down or the server went away
    #[error("Bridge is closed")]
    Closed,
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            reason: err.to_string(),
        }
    }
}

impl BridgeError {
    /// Check if this is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
