//! CLI configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use trellis_bridge::BridgeConfig;
use trellis_machine::EngineConfig;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {}: {reason}", path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// OS error
        reason: String,
    },

    /// File is not a valid configuration
    #[error("Invalid config {}: {reason}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Decoder message
        reason: String,
    },
}

/// Settings for the `trellis` binary
///
/// Loaded from an optional JSON file; command-line flags override it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// `tracing` filter directives
    pub log_filter: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Engine settings for `run`
    pub engine: EngineConfig,
    /// Defaults for bridges started by `tools` and `call`
    pub bridge: BridgeConfig,
    /// How long `run` waits for a machine to finish, in seconds
    pub run_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_filter: "trellis=info".to_string(),
            json_logs: false,
            engine: EngineConfig::default(),
            bridge: BridgeConfig::default(),
            run_timeout_secs: 60,
        }
    }
}

impl CliConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a file, or defaults when no file is given
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Override the log filter
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Override the run timeout
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = timeout.as_secs();
        self
    }

    /// Run timeout
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Bridge config for a command, keeping the configured defaults
    #[must_use]
    pub fn bridge_for(&self, command: &str, args: &[String]) -> BridgeConfig {
        BridgeConfig {
            command: command.to_string(),
            args: args.to_vec(),
            ..self.bridge.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config, CliConfig::new());
        assert_eq!(config.log_filter, "trellis=info");
        assert_eq!(config.run_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"engine": {{"max_attempts": 5}}, "bridge": {{"timeout_ms": 250}}}}"#
        )
        .unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.stop_hook_timeout_ms, 5_000);
        assert_eq!(config.bridge.timeout_ms, 250);
        assert_eq!(config.log_filter, "trellis=info");

        let bridge = config.bridge_for("srv", &["--x".to_string()]);
        assert_eq!(bridge.command_line(), "srv --x");
        assert_eq!(bridge.timeout_ms, 250);
    }

    #[test]
    fn test_load_errors() {
        let missing = CliConfig::load(Some(Path::new("/nonexistent/trellis.json")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let broken = CliConfig::load(Some(file.path()));
        assert!(matches!(broken, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let config = CliConfig::new()
            .with_log_filter("trellis=debug")
            .with_run_timeout(Duration::from_secs(3));
        assert_eq!(config.log_filter, "trellis=debug");
        assert_eq!(config.run_timeout_secs, 3);
    }
}
