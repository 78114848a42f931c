//! Built-in `echo` hat: a loopback state that returns whatever it is sent.

use crate::error::HatResult;
use crate::fragment::Fragment;
use crate::hat::{Hat, HatKind, HatMaker};
use async_trait::async_trait;
use serde_json::Value;
use trellis_core::StateId;
use trellis_machine::{
    Action, ActionError, ActionInput, ActionOutcome, Context, Event, State, Xition,
};

/// Registry name of the echo hat
pub const HAT_NAME: &str = "echo";

/// Action name registered by the echo hat
pub const ACTION_NAME: &str = "echo";

/// Makes [`EchoHat`]s; the declaration config is ignored
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoMaker;

impl HatMaker for EchoMaker {
    fn make(&self, state: &StateId, _config: &Value) -> HatResult<Box<dyn Hat>> {
        Ok(Box::new(EchoHat::new(state.clone())))
    }
}

/// Adds `<state>-echo`, reachable from and returning to `<state>`
#[derive(Debug, Clone)]
pub struct EchoHat {
    state: StateId,
}

impl EchoHat {
    /// Create an echo hat for a state
    #[must_use]
    pub fn new(state: StateId) -> Self {
        Self { state }
    }

    /// The loopback state's identifier
    #[must_use]
    pub fn echo_state(&self) -> StateId {
        self.state.suffixed("echo")
    }
}

#[async_trait]
impl Hat for EchoHat {
    fn kind(&self) -> HatKind {
        HatKind::Static
    }

    async fn apply(&self, context: Context) -> HatResult<(Context, Fragment)> {
        let echo = self.echo_state();
        let context = if context.has_action(ACTION_NAME) {
            context
        } else {
            context.with_action(ACTION_NAME, EchoAction)
        };

        let fragment = Fragment::new()
            .with_state(
                State::new(echo.clone())
                    .with_action(ACTION_NAME)
                    .with_prompt("Repeats the message it receives."),
            )
            .with_xition(
                Xition::new(self.state.clone(), echo.clone())
                    .with_description("send a message to be echoed"),
            )
            .with_xition(
                Xition::new(echo.clone(), self.state.clone()).with_description("echoed message"),
            )
            .with_prompt(
                self.state.clone(),
                format!(
                    "Send any message along [{}, {}] and it comes back unchanged.",
                    self.state, echo
                ),
            );

        Ok((context, fragment))
    }
}

/// Sends the entering message back along the reversed xition
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    async fn invoke(
        &self,
        context: Context,
        input: ActionInput<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        tracing::debug!(xition = %input.xition, "echo");
        let event = Event::new(input.xition.reversed(), input.event.message.clone());
        Ok(ActionOutcome::emit(context, event))
    }
}
