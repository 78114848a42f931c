//! Tool hat (`mcp`).
//!
//! Gives a state access to a tool server. The first application for a
//! state starts a bridge and keeps it in the context under
//! `tool/<state>`; later applications reuse it. The hat adds a
//! `<state>-tool` state whose action forwards tool calls to the bridge and
//! returns the results, and schema providers that build the request and
//! response schemas from the live tool catalogue.

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::protocol::{ToolCalls, ToolInfo};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use trellis_core::{StateId, XitionId};
use trellis_hat::{Fragment, Hat, HatError, HatKind, HatMaker, HatResult};
use trellis_machine::{
    Action, ActionError, ActionInput, ActionOutcome, Context, Event, HookError, ProviderError,
    SchemaProvider, State, Xition, stop_hook,
};
use trellis_schema::{Registry, SchemaSource};

/// Registry name of the tool hat
pub const HAT_NAME: &str = "mcp";

/// Context key of a state's tool session
#[must_use]
pub fn session_key(state: &StateId) -> String {
    format!("tool/{}", state)
}

/// A state's bridge, stored in the context
#[derive(Debug)]
pub struct ToolSession {
    /// State the session belongs to
    pub state: StateId,
    /// Live bridge
    pub bridge: Bridge,
}

/// Makes [`ToolHat`]s from `mcp` declarations
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolMaker;

impl HatMaker for ToolMaker {
    fn make(&self, state: &StateId, config: &Value) -> HatResult<Box<dyn Hat>> {
        let config = if config.is_null() {
            None
        } else {
            let parsed: BridgeConfig = serde_json::from_value(config.clone())
                .map_err(|e| HatError::invalid_config(HAT_NAME, state, e.to_string()))?;
            Some(parsed)
        };
        Ok(Box::new(ToolHat::new(state.clone(), config)))
    }
}

/// Tool hat bound to one state
#[derive(Debug, Clone)]
pub struct ToolHat {
    state: StateId,
    config: Option<BridgeConfig>,
}

impl ToolHat {
    /// Create a tool hat; without config it can only reuse a session
    #[must_use]
    pub fn new(state: StateId, config: Option<BridgeConfig>) -> Self {
        Self { state, config }
    }

    async fn session(&self, context: Context) -> HatResult<(Context, Arc<ToolSession>)> {
        let key = session_key(&self.state);
        if let Some(session) = context.hat_state::<ToolSession>(&key) {
            tracing::debug!(state = %self.state, bridge = %session.bridge.id(), "reusing tool session");
            return Ok((context, session));
        }

        let config = self.config.clone().ok_or_else(|| {
            HatError::invalid_config(HAT_NAME, &self.state, "no session to reuse and no command")
        })?;
        let bridge = Bridge::start(config)
            .await
            .map_err(|e| HatError::failed(HAT_NAME, &self.state, e.to_string()))?;
        let session = Arc::new(ToolSession {
            state: self.state.clone(),
            bridge,
        });

        let owned = session.clone();
        let hook = stop_hook(format!("{}:{}", HAT_NAME, self.state), move || {
            let session = owned.clone();
            async move {
                session
                    .bridge
                    .shutdown()
                    .await
                    .map_err(|e| HookError::new(e.to_string()))
            }
        });

        let context = context
            .with_hat_state(key, session.clone())
            .with_stop_hook(hook);
        Ok((context, session))
    }
}

#[async_trait]
impl Hat for ToolHat {
    fn kind(&self) -> HatKind {
        HatKind::Dynamic
    }

    async fn apply(&self, context: Context) -> HatResult<(Context, Fragment)> {
        let (context, session) = self.session(context).await?;
        let state = &self.state;
        let tool_state = state.suffixed("tool");
        let request_key = format!("{}-request", state);
        let response_key = format!("{}-response", state);

        let context = context
            .with_provider(
                request_key.clone(),
                CatalogueSchema {
                    session: session_key(state),
                    direction: Direction::Request,
                },
            )
            .with_provider(
                response_key.clone(),
                CatalogueSchema {
                    session: session_key(state),
                    direction: Direction::Response,
                },
            )
            .with_action(
                tool_state.as_str(),
                ToolAction {
                    state: state.clone(),
                },
            );

        let mut fragment = Fragment::new()
            .with_state(
                State::new(tool_state.clone())
                    .with_action(tool_state.as_str())
                    .with_prompt("Runs tool calls and returns their results."),
            )
            .with_xition(
                Xition::new(state.clone(), tool_state.clone())
                    .with_schema(SchemaSource::dynamic(request_key))
                    .with_description("call one tool, or a list of tools in order"),
            )
            .with_xition(
                Xition::new(tool_state.clone(), state.clone())
                    .with_schema(SchemaSource::dynamic(response_key))
                    .with_description("tool results"),
            )
            .with_prompt(
                state.clone(),
                format!(
                    "To use a tool, send {{\"name\": ..., \"arguments\": {{...}}}} (or a list of them) along [{}, {}].",
                    state, tool_state
                ),
            );
        for tool in session.bridge.tools() {
            fragment = fragment.with_prompt(state.clone(), describe(&tool));
        }

        Ok((context, fragment))
    }
}

fn describe(tool: &ToolInfo) -> String {
    match &tool.description {
        Some(description) => format!(
            "Tool {}: {} Arguments: {}",
            tool.name, description, tool.input_schema
        ),
        None => format!("Tool {}. Arguments: {}", tool.name, tool.input_schema),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

/// Builds xition schemas from the session's current catalogue
struct CatalogueSchema {
    session: String,
    direction: Direction,
}

impl SchemaProvider for CatalogueSchema {
    fn schema(&self, context: &Context, _xition: &Xition) -> Result<Value, ProviderError> {
        let session = context
            .hat_state::<ToolSession>(&self.session)
            .ok_or_else(|| ProviderError::new(format!("no tool session {}", self.session)))?;
        let tools = session.bridge.tools();
        Ok(match self.direction {
            Direction::Request => request_schema(&tools),
            Direction::Response => response_schema(&tools),
        })
    }
}

/// Inline a tool's own `$defs` so its schema can be nested elsewhere
fn standalone(schema: &Value) -> Value {
    Registry::new().resolve(schema).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "keeping tool schema unresolved");
        schema.clone()
    })
}

fn single_or_list(one: Value) -> Value {
    json!({
        "anyOf": [
            one.clone(),
            {"type": "array", "minItems": 1, "items": one}
        ]
    })
}

/// Schema of a call (or list of calls) to any catalogued tool
#[must_use]
pub fn request_schema(tools: &[ToolInfo]) -> Value {
    if tools.is_empty() {
        return Value::Bool(false);
    }
    let variants: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "type": "object",
                "properties": {
                    "name": {"const": tool.name},
                    "arguments": standalone(&tool.input_schema)
                },
                "required": ["name", "arguments"]
            })
        })
        .collect();
    single_or_list(json!({ "oneOf": variants }))
}

/// Schema of the result (or list of results) of any catalogued tool
///
/// Any value is accepted when some tool declares no output schema.
#[must_use]
pub fn response_schema(tools: &[ToolInfo]) -> Value {
    let mut outputs = Vec::with_capacity(tools.len());
    for tool in tools {
        match &tool.output_schema {
            Some(schema) => outputs.push(unwrap_output(standalone(schema))),
            None => return Value::Bool(true),
        }
    }
    if outputs.is_empty() {
        return Value::Bool(true);
    }
    single_or_list(json!({ "anyOf": outputs }))
}

/// Output schemas describing a `{"result": v}` envelope describe `v`
fn unwrap_output(schema: Value) -> Value {
    let inner = schema
        .get("properties")
        .and_then(Value::as_object)
        .filter(|props| props.len() == 1)
        .and_then(|props| props.get("result"))
        .cloned();
    inner.unwrap_or(schema)
}

/// Forwards the entering message to the state's bridge
#[derive(Debug, Clone)]
pub struct ToolAction {
    state: StateId,
}

#[async_trait]
impl Action for ToolAction {
    async fn invoke(
        &self,
        context: Context,
        input: ActionInput<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let tool_state = self.state.suffixed("tool");
        let name = tool_state.as_str();
        let session = context
            .hat_state::<ToolSession>(&session_key(&self.state))
            .ok_or_else(|| ActionError::failed(name, "no tool session"))?;
        let calls: ToolCalls = serde_json::from_value(input.event.message.clone())
            .map_err(|e| ActionError::bad_input(name, e.to_string()))?;

        let bridge = &session.bridge;
        let result = bridge
            .call_batch(&calls, bridge.config().timeout())
            .await
            .map_err(|e| match e {
                BridgeError::ToolCallFailed {
                    tool,
                    arguments,
                    error,
                } => ActionError::tool_failed(name, tool, arguments, error),
                other => ActionError::failed(name, other.to_string()),
            })?;

        let notifications = bridge.drain_notifications();
        let mut event = Event::new(XitionId::new(tool_state.clone(), self.state.clone()), result);
        if !notifications.is_empty() {
            let notes = serde_json::to_value(&notifications)
                .map_err(|e| ActionError::failed(name, e.to_string()))?;
            event = event.with_field("notifications", notes);
        }
        Ok(ActionOutcome::emit(context, event))
    }
}
