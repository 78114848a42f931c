//! Subcommand implementations.

use crate::config::CliConfig;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use trellis_bridge::{Bridge, BridgeConfig, ToolInfo};
use trellis_hat::echo::{ACTION_NAME as ECHO_ACTION, EchoAction};
use trellis_hat::{ComposeReport, apply_hats, run_stop_hooks};
use trellis_machine::{Context, Engine, Event, Machine, Outcome, Trail};

/// Read a machine document
pub fn load_machine(path: &Path) -> Result<Machine> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading machine {}", path.display()))?;
    Machine::from_json(&text).wrap_err_with(|| format!("parsing machine {}", path.display()))
}

/// Read an event document
pub fn load_event(path: &Path) -> Result<Event> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading event {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing event {}", path.display()))
}

/// Definition problems, one line each
#[must_use]
pub fn validate(machine: &Machine) -> Vec<String> {
    match machine.check() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    }
}

fn base_context() -> Context {
    Context::new().with_action(ECHO_ACTION, EchoAction)
}

/// Apply every hat and return the composed machine
///
/// Bridges started while composing are shut down before returning.
pub async fn compose(machine: Machine, config: &CliConfig) -> Result<(Machine, ComposeReport)> {
    let (context, composed, report) =
        apply_hats(base_context(), machine, &trellis_bridge::registry()).await?;
    let (_, hooks) = run_stop_hooks(context, config.engine.stop_hook_timeout()).await;
    if !hooks.is_clean() {
        tracing::warn!(failed = hooks.failed.len(), timed_out = hooks.timed_out.len(), "cleanup incomplete");
    }
    Ok((composed, report))
}

/// Start a bridge and return its tool catalogue
pub async fn tools(config: BridgeConfig) -> Result<Vec<ToolInfo>> {
    let bridge = Bridge::start(config).await?;
    let tools = bridge.tools();
    bridge.shutdown().await?;
    Ok(tools)
}

/// Start a bridge and call one tool
pub async fn call(config: BridgeConfig, tool: &str, arguments: Value) -> Result<Value> {
    let timeout = config.timeout();
    let bridge = Bridge::start(config).await?;
    let result = bridge.call(tool, arguments, timeout).await;
    bridge.shutdown().await?;
    Ok(result?)
}

/// Result of `run`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Machine reached `end`
    pub completed: bool,
    /// Why the run did not complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every attempted traversal
    pub trail: Trail,
}

/// Compose a machine, submit one event and wait for the run to finish
pub async fn run(machine: Machine, event: Event, config: &CliConfig) -> Result<RunReport> {
    let (context, composed, _) =
        apply_hats(base_context(), machine, &trellis_bridge::registry()).await?;
    let mut run = Engine::new(composed, context).start(config.engine.clone())?;
    run.submit(event)?;

    let outcome = run.wait(config.run_timeout()).await;
    let shutdown = run.stop().await?;
    if !shutdown.hooks.is_clean() {
        tracing::warn!(failed = ?shutdown.hooks.failed, "stop hooks failed");
    }

    let error = match &outcome {
        Outcome::Completed { .. } => None,
        Outcome::Failed { error, .. } => Some(error.to_string()),
        Outcome::TimedOut { .. } => Some(format!("no result after {:?}", config.run_timeout())),
        Outcome::Stopped { .. } => Some("run stopped".to_string()),
    };
    Ok(RunReport {
        completed: outcome.is_completed(),
        error,
        trail: shutdown.trail,
    })
}

/// Parse a JSON argument given on the command line
pub fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| eyre!("invalid JSON {:?}: {}", text, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use trellis_core::{StateId, XitionId};
    use trellis_machine::{HatDecl, State, Xition};
    use trellis_schema::SchemaSource;

    fn direct() -> Machine {
        Machine::new("direct", "1")
            .with_schema("greeting", json!({"type": "string", "minLength": 1}))
            .with_xition(Xition::new("start", "end").with_schema(SchemaSource::local("greeting")))
    }

    #[test]
    fn test_load_machine_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", direct().to_json_pretty().unwrap()).unwrap();
        assert_eq!(load_machine(file.path()).unwrap(), direct());
        assert!(load_machine(Path::new("/nonexistent/machine.json")).is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        assert!(validate(&direct()).is_empty());
        let broken = direct().with_xition(Xition::new("start", "ghost"));
        let problems = validate(&broken);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("ghost"), "{}", problems[0]);
    }

    #[tokio::test]
    async fn test_compose_applies_echo() {
        let machine = Machine::new("m", "1")
            .with_state(
                State::new("worker")
                    .with_action("echo")
                    .with_hat(HatDecl::bare("echo")),
            )
            .with_xition(Xition::new("start", "worker"))
            .with_xition(Xition::new("worker", "end"));
        let (composed, report) = compose(machine, &CliConfig::new()).await.unwrap();
        assert!(composed.state(&StateId::new("worker-echo")).is_some());
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_run_direct_machine() {
        let event = Event::new(XitionId::new("start", "end"), json!("hello"));
        let report = run(direct(), event, &CliConfig::new()).await.unwrap();
        assert!(report.completed, "{:?}", report);
        assert_eq!(report.trail.len(), 1);

        let bad = Event::new(XitionId::new("start", "end"), json!(""));
        let report = run(direct(), bad, &CliConfig::new()).await.unwrap();
        assert!(!report.completed);
        assert!(report.error.is_some());
        assert_eq!(report.trail.failures().count(), 1);
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert!(parse_json("{a").is_err());
    }
}
