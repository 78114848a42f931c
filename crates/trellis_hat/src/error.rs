//! Hat errors.

use trellis_core::StateId;

/// Hat result type
pub type HatResult<T> = Result<T, HatError>;

/// Failures while making or applying a hat
///
/// An unknown hat name is not an error; it is reported as a
/// [`CompositionWarning`](crate::CompositionWarning).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HatError {
    /// Hat declaration config is not what the hat expects
    #[error("Hat {hat} on {state}: invalid config: {reason}")]
    InvalidConfig {
        /// Hat name
        hat: String,
        /// State wearing the hat
        state: StateId,
        /// What is wrong
        reason: String,
    },

    /// Hat could not acquire what it needs (process, connection, ...)
    #[error("Hat {hat} on {state} failed: {reason}")]
    Failed {
        /// Hat name
        hat: String,
        /// State wearing the hat
        state: StateId,
        /// What went wrong
        reason: String,
    },
}

impl HatError {
    /// Create a config error
    #[must_use]
    pub fn invalid_config(hat: impl Into<String>, state: &StateId, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            hat: hat.into(),
            state: state.clone(),
            reason: reason.into(),
        }
    }

    /// Create an application failure
    #[must_use]
    pub fn failed(hat: impl Into<String>, state: &StateId, reason: impl Into<String>) -> Self {
        Self::Failed {
            hat: hat.into(),
            state: state.clone(),
            reason: reason.into(),
        }
    }
}
