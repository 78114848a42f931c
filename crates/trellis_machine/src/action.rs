//! Actions: the behaviour attached to a state.

use crate::context::Context;
use crate::definition::{Machine, State};
use crate::engine::Submitter;
use crate::event::Event;
use crate::trail::{Failure, Trail};
use async_trait::async_trait;
use serde_json::Value;
use trellis_core::XitionId;

/// Action failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// The action could not do its work
    #[error("Action {action} failed: {reason}")]
    Failed {
        /// Action name
        action: String,
        /// What went wrong
        reason: String,
    },

    /// The entering event is not something the action understands
    #[error("Action {action} cannot handle its input: {reason}")]
    BadInput {
        /// Action name
        action: String,
        /// What was wrong with the input
        reason: String,
    },

    /// A tool the action called reported an error
    #[error("Action {action} failed: tool {tool} failed: {error}")]
    ToolFailed {
        /// Action name
        action: String,
        /// Tool name
        tool: String,
        /// Arguments the tool was called with
        arguments: Value,
        /// Error reported by the tool
        error: String,
    },
}

impl ActionError {
    /// Create a failure
    #[must_use]
    pub fn failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Create a tool failure
    #[must_use]
    pub fn tool_failed(
        action: impl Into<String>,
        tool: impl Into<String>,
        arguments: Value,
        error: impl Into<String>,
    ) -> Self {
        Self::ToolFailed {
            action: action.into(),
            tool: tool.into(),
            arguments,
            error: error.into(),
        }
    }

    /// Create an input error
    #[must_use]
    pub fn bad_input(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadInput {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Everything an action sees when its state is entered
pub struct ActionInput<'a> {
    /// Machine being run
    pub machine: &'a Machine,
    /// Xition that entered the state
    pub xition: &'a XitionId,
    /// The entered state
    pub state: &'a State,
    /// Trail up to and including the entering traversal
    pub trail: &'a Trail,
    /// The entering event
    pub event: &'a Event,
    /// Rejection of this action's previous output, when retrying
    pub feedback: Option<&'a Failure>,
    /// Attempt number (1-based)
    pub attempt: u32,
    /// Submits further events to the run
    pub submitter: &'a Submitter,
}

/// What the engine does after an action returns
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Submit one event
    Emit(Event),
    /// Submit several events, in order
    FanOut(Vec<Event>),
    /// Submit nothing; something else will drive the run
    Wait,
}

/// Result of an action: the (possibly extended) context and the next step
#[derive(Debug)]
pub struct ActionOutcome {
    /// Context to continue with
    pub context: Context,
    /// Next step
    pub step: Step,
}

impl ActionOutcome {
    /// Submit one event
    #[must_use]
    pub fn emit(context: Context, event: Event) -> Self {
        Self {
            context,
            step: Step::Emit(event),
        }
    }

    /// Submit several events
    #[must_use]
    pub fn fan_out(context: Context, events: Vec<Event>) -> Self {
        Self {
            context,
            step: Step::FanOut(events),
        }
    }

    /// Submit nothing
    #[must_use]
    pub fn wait(context: Context) -> Self {
        Self {
            context,
            step: Step::Wait,
        }
    }
}

/// Behaviour run when a state is entered
#[async_trait]
pub trait Action: Send + Sync {
    /// Run the action
    ///
    /// # Errors
    ///
    /// An error fails the run.
    async fn invoke(&self, context: Context, input: ActionInput<'_>)
        -> Result<ActionOutcome, ActionError>;

    /// Whether a rejected emission should be retried with feedback
    fn retry_with_feedback(&self) -> bool {
        false
    }
}
