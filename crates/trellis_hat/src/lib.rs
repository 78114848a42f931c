//! TRELLIS Hats
//!
//! Hats are capability fragments attached to states. The composer applies
//! each declared hat to the run context and merges the states, xitions and
//! prompt lines it returns into the machine before the run starts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compose;
pub mod echo;
pub mod error;
pub mod fragment;
pub mod hat;
pub mod registry;

pub use compose::{AppliedHat, ComposeReport, CompositionWarning, apply_hats};
pub use echo::{EchoAction, EchoHat, EchoMaker};
pub use error::{HatError, HatResult};
pub use fragment::Fragment;
pub use hat::{Hat, HatKind, HatMaker};
pub use registry::HatRegistry;

// Stop hooks live with the context they are registered on.
pub use trellis_machine::{HookError, StopHook, StopReport, add_stop_hook, run_stop_hooks, stop_hook};
