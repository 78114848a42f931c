//! TRELLIS Bridge
//!
//! Talks JSON-RPC 2.0 to a tool server running as a child process, one JSON
//! document per line over its stdin and stdout. The bridge runs the
//! `initialize` handshake, caches the tool catalogue and routes responses
//! to concurrent requests by id. The `mcp` hat builds on it to give a
//! machine state access to the server's tools.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod hat;
pub mod process;
pub mod protocol;

pub use bridge::Bridge;
pub use config::{BridgeConfig, Transport};
pub use error::{BridgeError, BridgeResult};
pub use hat::{HAT_NAME, ToolAction, ToolHat, ToolMaker, ToolSession, request_schema, response_schema, session_key};
pub use process::ServerProcess;
pub use protocol::{
    Implementation, Incoming, Notification, Request, Response, RpcError, ServerInfo, ToolCall,
    ToolCalls, ToolInfo, tool_result, unwrap_envelope,
};

use trellis_hat::HatRegistry;

/// Hat registry with the built-in hats and the `mcp` tool hat
#[must_use]
pub fn registry() -> HatRegistry {
    HatRegistry::builtin().with_maker(HAT_NAME, ToolMaker)
}
