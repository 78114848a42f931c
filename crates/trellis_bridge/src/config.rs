//! Bridge configuration.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the server is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Child process speaking line-delimited JSON on stdin/stdout
    #[default]
    Stdio,
}

/// Bridge configuration
///
/// This is also the config map of an `mcp` hat declaration:
/// `{"mcp": {"command": "server", "args": ["--flag"], "timeout_ms": 2000}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Server executable
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: IndexMap<String, String>,
    /// Transport
    pub transport: Transport,
    /// Default request timeout in milliseconds
    pub timeout_ms: u64,
    /// Pause after `notifications/initialized`, in milliseconds
    pub settle_ms: u64,
    /// Client name sent in `initialize`
    pub client_name: String,
    /// Client version sent in `initialize`
    pub client_version: String,
    /// Protocol version requested in `initialize`
    pub protocol_version: String,
    /// Send `notifications/cancelled` for requests that time out
    pub cancel_on_timeout: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: IndexMap::new(),
            transport: Transport::Stdio,
            timeout_ms: 30_000,
            settle_ms: 50,
            client_name: "trellis".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "2024-11-05".to_string(),
            cancel_on_timeout: true,
        }
    }
}

impl BridgeConfig {
    /// Create a config for a command
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Add an argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the default request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the settle pause
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_ms = u64::try_from(settle.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable cancellation notices on timeout
    #[must_use]
    pub fn with_cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_timeout = cancel;
        self
    }

    /// Default request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Settle pause
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Command line for logs and errors
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
