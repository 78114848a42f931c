//! Hats and hat makers.

use crate::error::HatResult;
use crate::fragment::Fragment;
use async_trait::async_trait;
use serde_json::Value;
use trellis_core::StateId;
use trellis_machine::Context;

/// Whether a hat's fragment depends on the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HatKind {
    /// Same fragment on every application
    Static,
    /// Inspects or extends the context (sessions, bound values)
    Dynamic,
}

/// A hat bound to one state
#[async_trait]
pub trait Hat: Send + Sync {
    /// Static or dynamic
    fn kind(&self) -> HatKind;

    /// Extend the context and produce the fragment to merge
    ///
    /// # Errors
    ///
    /// Returns error if the hat cannot acquire what it needs
    async fn apply(&self, context: Context) -> HatResult<(Context, Fragment)>;
}

/// Builds a hat for a state from its declaration config
pub trait HatMaker: Send + Sync {
    /// Make the hat
    ///
    /// # Errors
    ///
    /// Returns error if `config` is not what the hat expects
    fn make(&self, state: &StateId, config: &Value) -> HatResult<Box<dyn Hat>>;
}

impl<F> HatMaker for F
where
    F: Fn(&StateId, &Value) -> HatResult<Box<dyn Hat>> + Send + Sync,
{
    fn make(&self, state: &StateId, config: &Value) -> HatResult<Box<dyn Hat>> {
        self(state, config)
    }
}
