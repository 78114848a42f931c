//! Server child process.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// An owned server process
///
/// The process is killed when this value is dropped; [`stop`](Self::stop)
/// kills and reaps it explicitly.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    pid: Option<u32>,
    command: String,
    stopped: bool,
}

impl ServerProcess {
    /// Spawn the configured command with piped stdio
    ///
    /// Stderr lines are forwarded to the log at debug level.
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty or cannot be started
    pub fn spawn(config: &BridgeConfig) -> BridgeResult<(Self, ChildStdin, ChildStdout)> {
        if config.command.is_empty() {
            return Err(BridgeError::Config {
                reason: "command is empty".to_string(),
            });
        }
        let command = config.command_line();

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| BridgeError::Spawn {
            command: command.clone(),
            reason: format!("no {} pipe", stream),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let name = config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %name, "{}", line);
                }
            });
        }

        let pid = child.id();
        tracing::info!(command = %command, pid, "server process started");

        Ok((
            Self {
                child,
                pid,
                command,
                stopped: false,
            },
            stdin,
            stdout,
        ))
    }

    /// OS process id, if the process was running when spawned
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Check if [`stop`](Self::stop) has run
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Kill and reap the process; later calls do nothing
    ///
    /// # Errors
    ///
    /// Returns error if the process could not be killed
    pub async fn stop(&mut self) -> BridgeResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(command = %self.command, %status, "server process already exited");
                Ok(())
            }
            _ => {
                self.child.kill().await.map_err(|e| BridgeError::Spawn {
                    command: self.command.clone(),
                    reason: format!("kill failed: {}", e),
                })?;
                tracing::info!(command = %self.command, pid = self.pid, "server process stopped");
                Ok(())
            }
        }
    }
}
