//! TRELLIS Machine
//!
//! Interpreter for schema-guarded state machines. Events cross xitions
//! only if their message validates against the xition's schema; every
//! attempt, accepted or not, lands in an append-only trail.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod context;
pub mod definition;
pub mod engine;
pub mod event;
pub mod hooks;
pub mod trail;

pub use action::{Action, ActionError, ActionInput, ActionOutcome, Step};
pub use context::{Context, ProviderError, SchemaProvider};
pub use definition::{DefinitionError, HatDecl, Machine, State, Xition};
pub use engine::{
    Engine, EngineConfig, EngineError, EngineResult, EngineState, Outcome, Run, Shutdown,
    Submitter,
};
pub use event::Event;
pub use hooks::{HookError, StopHook, StopReport, add_stop_hook, run_stop_hooks, stop_hook};
pub use trail::{Failure, FailureKind, Trail, TrailRecord};
