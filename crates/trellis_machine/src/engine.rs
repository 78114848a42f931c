//! Run loop.
//!
//! A run owns a work queue of events. Each event is checked against the
//! schema of the xition it names; accepted events are recorded and enter
//! their target state, whose action may emit further events. Rejected
//! events are recorded too, and the action that produced them may be
//! re-invoked with the rejection as feedback.

use crate::action::{ActionError, ActionInput, Step};
use crate::context::Context;
use crate::definition::{DefinitionError, Machine, Xition};
use crate::event::Event;
use crate::hooks::{StopReport, run_stop_hooks};
use crate::trail::{Failure, FailureKind, Trail, TrailRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trellis_core::{RunId, StateId, XitionId};
use trellis_schema::{Registry, SchemaError, SchemaSource, Validation, validate};

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Run failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Machine definition is inconsistent
    #[error("Invalid machine definition: {}", errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Definition {
        /// Every problem found
        errors: Vec<DefinitionError>,
    },

    /// State names an action the context does not provide
    #[error("State {state} uses unregistered action {action}")]
    UnknownAction {
        /// State
        state: StateId,
        /// Action name
        action: String,
    },

    /// A declared state has no action
    #[error("State {state} has no action")]
    NoAction {
        /// State
        state: StateId,
    },

    /// Event entered a state the machine does not declare
    #[error("Unknown state: {state}")]
    UnknownState {
        /// State
        state: StateId,
    },

    /// Dynamic schema key has no provider in the context
    #[error("No schema provider {key} for {xition}")]
    UnknownProvider {
        /// Lookup key
        key: String,
        /// Xition being validated
        xition: XitionId,
    },

    /// Dynamic schema provider failed
    #[error("Schema provider {key} failed: {reason}")]
    Provider {
        /// Lookup key
        key: String,
        /// Provider message
        reason: String,
    },

    /// Xition schema could not be resolved or compiled
    #[error("Schema for {xition} is unusable: {error}")]
    Schema {
        /// Xition being validated
        xition: XitionId,
        /// Underlying failure
        error: SchemaError,
    },

    /// Event rejected and no retry left
    #[error("Event for {xition} rejected: {}", failure.summary())]
    Rejected {
        /// Requested xition
        xition: XitionId,
        /// Last rejection
        failure: Failure,
    },

    /// Action failed
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Run is no longer accepting events
    #[error("Run is not running")]
    NotRunning,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts allowed for a retrying action, including the first
    pub max_attempts: u32,
    /// Per-hook stop timeout in milliseconds
    pub stop_hook_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stop_hook_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget of retrying actions
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the per-hook stop timeout
    #[must_use]
    pub fn with_stop_hook_timeout(mut self, timeout: Duration) -> Self {
        self.stop_hook_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-hook stop timeout
    #[must_use]
    pub fn stop_hook_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_hook_timeout_ms)
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Built, not started
    Idle,
    /// Accepting events
    Running,
    /// Stopped; stop hooks have run
    Stopped,
}

/// Where a queued event came from
#[derive(Debug, Clone)]
enum Origin {
    /// Submitted from outside the run loop
    External,
    /// Emitted by the action of `state`
    Action(Provenance),
}

#[derive(Debug, Clone)]
struct Provenance {
    state: StateId,
    entered_by: Event,
    attempt: u32,
}

impl Origin {
    fn attempt(&self) -> u32 {
        match self {
            Self::External => 1,
            Self::Action(provenance) => provenance.attempt,
        }
    }
}

#[derive(Debug)]
struct WorkItem {
    event: Event,
    origin: Origin,
}

/// Handle for submitting events to a run
#[derive(Debug, Clone)]
pub struct Submitter {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl Submitter {
    /// Queue an event
    ///
    /// # Errors
    ///
    /// Returns error if the run has finished or been stopped
    pub fn submit(&self, event: Event) -> EngineResult<()> {
        self.send(WorkItem {
            event,
            origin: Origin::External,
        })
    }

    fn send(&self, item: WorkItem) -> EngineResult<()> {
        self.tx.send(item).map_err(|_| EngineError::NotRunning)
    }

    /// Check if the run still accepts events
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// How a run ended
#[derive(Debug)]
pub enum Outcome {
    /// An event crossed into `end`
    Completed {
        /// Final context
        context: Context,
        /// Full trail
        trail: Trail,
    },
    /// The run failed
    Failed {
        /// Cause
        error: EngineError,
        /// Context at the failure
        context: Context,
        /// Full trail
        trail: Trail,
    },
    /// The run did not finish within the wait
    TimedOut {
        /// Trail so far
        trail: Trail,
    },
    /// The run was stopped before finishing
    Stopped {
        /// Trail so far
        trail: Trail,
    },
}

impl Outcome {
    /// Check if the run completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Check if the wait timed out
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// The trail carried by any outcome
    #[must_use]
    pub fn trail(&self) -> &Trail {
        match self {
            Self::Completed { trail, .. }
            | Self::Failed { trail, .. }
            | Self::TimedOut { trail }
            | Self::Stopped { trail } => trail,
        }
    }

    /// Final context, if the run finished
    #[must_use]
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Completed { context, .. } | Self::Failed { context, .. } => Some(context),
            Self::TimedOut { .. } | Self::Stopped { .. } => None,
        }
    }

    /// Failure cause, if the run failed
    #[must_use]
    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// What [`Run::stop`] hands back
#[derive(Debug)]
pub struct Shutdown {
    /// Context after stop hooks ran
    pub context: Context,
    /// Full trail
    pub trail: Trail,
    /// Stop hook results
    pub hooks: StopReport,
}

#[derive(Debug, Clone)]
struct Finished {
    result: Result<(), EngineError>,
    context: Context,
}

/// A machine with its context, ready to run
#[derive(Debug)]
pub struct Engine {
    machine: Machine,
    context: Context,
    trail: Trail,
}

impl Engine {
    /// Create an engine
    #[must_use]
    pub fn new(machine: Machine, context: Context) -> Self {
        Self {
            machine,
            context,
            trail: Trail::new(),
        }
    }

    /// Seed the run with records from an earlier run
    #[must_use]
    pub fn with_trail(mut self, trail: Trail) -> Self {
        self.trail = trail;
        self
    }

    /// Lifecycle state; an engine that has not started is idle
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::Idle
    }

    /// Start the run loop
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the machine definition is inconsistent or a state
    /// names an action the context does not provide.
    pub fn start(self, config: EngineConfig) -> EngineResult<Run> {
        self.machine
            .check()
            .map_err(|errors| EngineError::Definition { errors })?;

        for state in &self.machine.states {
            let Some(action) = &state.action else {
                return Err(EngineError::NoAction {
                    state: state.id.clone(),
                });
            };
            if !self.context.has_action(action) {
                return Err(EngineError::UnknownAction {
                    state: state.id.clone(),
                    action: action.clone(),
                });
            }
        }

        let id = RunId::new();
        let registry = self.machine.registry();
        let machine = Arc::new(self.machine);
        let (tx, rx) = mpsc::unbounded_channel();
        let submitter = Submitter { tx };
        let trail = Arc::new(RwLock::new(self.trail));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let core = Core {
            id,
            machine: machine.clone(),
            registry,
            context: self.context,
            trail: trail.clone(),
            max_attempts: config.max_attempts.max(1),
            queue: submitter.clone(),
            outcome: outcome_tx,
        };
        let task = tokio::spawn(core.drive(rx, cancel.clone()));

        tracing::info!(run = %id, machine = %machine.id, version = %machine.version, "run started");

        Ok(Run {
            id,
            machine,
            submitter,
            trail,
            outcome: outcome_rx,
            cancel,
            task: Some(task),
            state: EngineState::Running,
            config,
        })
    }
}

/// A started run
pub struct Run {
    id: RunId,
    machine: Arc<Machine>,
    submitter: Submitter,
    trail: Arc<RwLock<Trail>>,
    outcome: watch::Receiver<Option<Finished>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Context>>,
    state: EngineState,
    config: EngineConfig,
}

impl Run {
    /// Run identifier
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Machine being run
    #[must_use]
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Handle for submitting events from elsewhere
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Queue an event
    ///
    /// # Errors
    ///
    /// Returns error if the run has finished or been stopped
    pub fn submit(&self, event: Event) -> EngineResult<()> {
        self.submitter.submit(event)
    }

    /// Snapshot of the trail
    pub async fn trail(&self) -> Trail {
        self.trail.read().await.clone()
    }

    /// Check if the run has completed or failed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the run to finish
    pub async fn wait(&self, timeout: Duration) -> Outcome {
        let mut outcome = self.outcome.clone();
        let finished = tokio::time::timeout(timeout, async move {
            outcome
                .wait_for(Option::is_some)
                .await
                .map(|finished| finished.clone())
        })
        .await;
        let trail = self.trail().await;

        match finished {
            Ok(Ok(Some(Finished {
                result: Ok(()),
                context,
            }))) => Outcome::Completed { context, trail },
            Ok(Ok(Some(Finished {
                result: Err(error),
                context,
            }))) => Outcome::Failed {
                error,
                context,
                trail,
            },
            Ok(Ok(None) | Err(_)) => Outcome::Stopped { trail },
            Err(_) => Outcome::TimedOut { trail },
        }
    }

    /// Stop the run loop and run stop hooks
    ///
    /// # Errors
    ///
    /// Returns error if the run was already stopped
    pub async fn stop(&mut self) -> EngineResult<Shutdown> {
        let task = self.task.take().ok_or(EngineError::NotRunning)?;
        self.cancel.cancel();
        let context = task.await.map_err(|e| EngineError::Internal {
            message: e.to_string(),
        })?;

        let (context, hooks) = run_stop_hooks(context, self.config.stop_hook_timeout()).await;
        self.state = EngineState::Stopped;
        tracing::info!(run = %self.id, hooks = hooks.completed.len(), "run stopped");

        Ok(Shutdown {
            context,
            trail: self.trail().await,
            hooks,
        })
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("machine", &self.machine.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

enum Flow {
    Continue,
    Completed,
    Cancelled,
}

/// State owned by the run loop task
struct Core {
    id: RunId,
    machine: Arc<Machine>,
    registry: Registry,
    context: Context,
    trail: Arc<RwLock<Trail>>,
    max_attempts: u32,
    queue: Submitter,
    outcome: watch::Sender<Option<Finished>>,
}

impl Core {
    async fn drive(mut self, mut rx: mpsc::UnboundedReceiver<WorkItem>, cancel: CancellationToken) -> Context {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match self.step(item, &cancel).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Cancelled) => break,
                Ok(Flow::Completed) => {
                    tracing::info!(run = %self.id, "run completed");
                    self.finish(Ok(()));
                    break;
                }
                Err(error) => {
                    tracing::warn!(run = %self.id, error = %error, "run failed");
                    self.finish(Err(error));
                    break;
                }
            }
        }
        self.context
    }

    fn finish(&self, result: Result<(), EngineError>) {
        self.outcome.send_replace(Some(Finished {
            result,
            context: self.context.clone(),
        }));
    }

    async fn step(&mut self, item: WorkItem, cancel: &CancellationToken) -> EngineResult<Flow> {
        let WorkItem { event, origin } = item;
        let attempt = origin.attempt();

        let Some(xition) = self.machine.xition(&event.id).cloned() else {
            let failure = Failure::message(
                FailureKind::UnknownXition,
                format!("machine has no xition {}", event.id),
                attempt,
            );
            self.record(&event, None, Some(failure.clone())).await;
            return self.reject(event.id, origin, failure, cancel).await;
        };

        let schema = match self.schema_for(&xition) {
            Ok(schema) => schema,
            Err(error) => {
                let failure = Failure::message(FailureKind::Schema, error.to_string(), attempt);
                self.record(&event, None, Some(failure)).await;
                return Err(error);
            }
        };

        match validate(&event.message, &schema, &self.registry) {
            Err(error) => {
                let failure = Failure::message(FailureKind::Schema, error.to_string(), attempt);
                self.record(&event, None, Some(failure)).await;
                Err(EngineError::Schema {
                    xition: event.id,
                    error,
                })
            }
            Ok(Validation::Invalid(errors)) => {
                let failure = Failure {
                    kind: FailureKind::Validation,
                    errors,
                    attempt,
                };
                self.record(&event, None, Some(failure.clone())).await;
                self.reject(event.id, origin, failure, cancel).await
            }
            Ok(Validation::Valid) => {
                let to = event.id.to().clone();
                self.record(&event, Some(to.clone()), None).await;
                tracing::debug!(run = %self.id, xition = %event.id, "traversed");

                if to.is_end() {
                    return Ok(Flow::Completed);
                }
                self.enter(&to, event, None, 1, cancel).await
            }
        }
    }

    fn schema_for(&self, xition: &Xition) -> EngineResult<Value> {
        match &xition.schema {
            SchemaSource::Dynamic(key) => {
                let provider =
                    self.context
                        .provider(key)
                        .ok_or_else(|| EngineError::UnknownProvider {
                            key: key.clone(),
                            xition: xition.id.clone(),
                        })?;
                provider
                    .schema(&self.context, xition)
                    .map_err(|e| EngineError::Provider {
                        key: key.clone(),
                        reason: e.reason,
                    })
            }
            source => Ok(Value::from(source.clone())),
        }
    }

    /// Retry the producing action if it allows it, otherwise fail the run
    async fn reject(
        &mut self,
        xition: XitionId,
        origin: Origin,
        failure: Failure,
        cancel: &CancellationToken,
    ) -> EngineResult<Flow> {
        tracing::warn!(
            run = %self.id,
            xition = %xition,
            kind = %failure.kind,
            attempt = failure.attempt,
            "event rejected"
        );

        match origin {
            Origin::Action(provenance)
                if provenance.attempt < self.max_attempts && self.retries(&provenance.state) =>
            {
                tracing::info!(
                    run = %self.id,
                    state = %provenance.state,
                    attempt = provenance.attempt + 1,
                    "retrying with feedback"
                );
                self.enter(
                    &provenance.state,
                    provenance.entered_by,
                    Some(failure),
                    provenance.attempt + 1,
                    cancel,
                )
                .await
            }
            _ => Err(EngineError::Rejected { xition, failure }),
        }
    }

    fn retries(&self, state: &StateId) -> bool {
        self.machine
            .state(state)
            .and_then(|s| s.action.as_deref())
            .and_then(|name| self.context.action(name))
            .is_some_and(|action| action.retry_with_feedback())
    }

    async fn enter(
        &mut self,
        state_id: &StateId,
        event: Event,
        feedback: Option<Failure>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> EngineResult<Flow> {
        let machine = self.machine.clone();
        let state = machine
            .state(state_id)
            .ok_or_else(|| EngineError::UnknownState {
                state: state_id.clone(),
            })?;
        let name = state.action.as_deref().ok_or_else(|| EngineError::NoAction {
            state: state_id.clone(),
        })?;
        let action = self
            .context
            .action(name)
            .ok_or_else(|| EngineError::UnknownAction {
                state: state_id.clone(),
                action: name.to_string(),
            })?;
        let trail = self.trail.read().await.clone();

        tracing::debug!(run = %self.id, state = %state_id, action = name, attempt, "entering state");

        let input = ActionInput {
            machine: &machine,
            xition: &event.id,
            state,
            trail: &trail,
            event: &event,
            feedback: feedback.as_ref(),
            attempt,
            submitter: &self.queue,
        };
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Ok(Flow::Cancelled),
            outcome = action.invoke(self.context.clone(), input) => outcome?,
        };
        self.context = outcome.context;

        let provenance = Provenance {
            state: state_id.clone(),
            entered_by: event,
            attempt,
        };
        let events = match outcome.step {
            Step::Emit(event) => vec![event],
            Step::FanOut(events) => events,
            Step::Wait => Vec::new(),
        };
        for event in events {
            self.queue.send(WorkItem {
                event,
                origin: Origin::Action(provenance.clone()),
            })?;
        }
        Ok(Flow::Continue)
    }

    async fn record(&self, event: &Event, to: Option<StateId>, failure: Option<Failure>) {
        let record = TrailRecord {
            machine_id: self.machine.id.clone(),
            machine_version: self.machine.version.clone(),
            from: event.id.from().clone(),
            to,
            event: event.clone(),
            failure,
        };
        self.trail.write().await.push(record);
    }
}
