//! Run context.
//!
//! The context is the explicit environment threaded through hats and
//! actions: it is passed in by value and handed back, never mutated behind
//! the caller's back. It holds the action table, dynamic schema providers,
//! per-hat session state, stop hooks and free-form data.

use crate::action::Action;
use crate::definition::Xition;
use crate::hooks::StopHook;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;

/// Failure to produce a dynamic schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Schema provider failed: {reason}")]
pub struct ProviderError {
    /// What went wrong
    pub reason: String,
}

impl ProviderError {
    /// Create a provider error
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Produces a xition schema at validation time
pub trait SchemaProvider: Send + Sync {
    /// Build the schema for `xition` given the current context
    ///
    /// # Errors
    ///
    /// Returns error if the schema cannot be produced
    fn schema(&self, context: &Context, xition: &Xition) -> Result<Value, ProviderError>;
}

impl<F> SchemaProvider for F
where
    F: Fn(&Context, &Xition) -> Result<Value, ProviderError> + Send + Sync,
{
    fn schema(&self, context: &Context, xition: &Xition) -> Result<Value, ProviderError> {
        self(context, xition)
    }
}

/// Environment threaded through hats and actions
#[derive(Clone, Default)]
pub struct Context {
    actions: IndexMap<String, Arc<dyn Action>>,
    providers: IndexMap<String, Arc<dyn SchemaProvider>>,
    hat_state: IndexMap<String, Arc<dyn Any + Send + Sync>>,
    stop_hooks: Vec<Arc<dyn StopHook>>,
    data: Map<String, Value>,
}

impl Context {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a name
    #[must_use]
    pub fn with_action(self, name: impl Into<String>, action: impl Action + 'static) -> Self {
        self.with_action_arc(name, Arc::new(action))
    }

    /// Register a shared action under a name
    #[must_use]
    pub fn with_action_arc(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Look up an action
    #[must_use]
    pub fn action(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Check if an action is registered
    #[must_use]
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Register a schema provider under a lookup key
    #[must_use]
    pub fn with_provider(
        mut self,
        key: impl Into<String>,
        provider: impl SchemaProvider + 'static,
    ) -> Self {
        self.providers.insert(key.into(), Arc::new(provider));
        self
    }

    /// Look up a schema provider
    #[must_use]
    pub fn provider(&self, key: &str) -> Option<Arc<dyn SchemaProvider>> {
        self.providers.get(key).cloned()
    }

    /// Store hat session state under a key such as `tool/worker`
    #[must_use]
    pub fn with_hat_state<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: Arc<T>) -> Self {
        self.hat_state.insert(key.into(), value);
        self
    }

    /// Fetch hat session state of a given type
    ///
    /// Returns `None` if nothing is stored under `key` or it has another type.
    #[must_use]
    pub fn hat_state<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.hat_state.get(key).cloned()?.downcast::<T>().ok()
    }

    /// Remove hat session state
    #[must_use]
    pub fn without_hat_state(mut self, key: &str) -> Self {
        self.hat_state.shift_remove(key);
        self
    }

    /// Register a stop hook; hooks run in reverse registration order
    #[must_use]
    pub fn with_stop_hook(mut self, hook: Arc<dyn StopHook>) -> Self {
        self.stop_hooks.push(hook);
        self
    }

    /// Registered stop hooks in registration order
    #[must_use]
    pub fn stop_hooks(&self) -> &[Arc<dyn StopHook>] {
        &self.stop_hooks
    }

    pub(crate) fn take_stop_hooks(mut self) -> (Self, Vec<Arc<dyn StopHook>>) {
        let hooks = std::mem::take(&mut self.stop_hooks);
        (self, hooks)
    }

    /// Set a data entry
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Get a data entry
    #[must_use]
    pub fn data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// All data entries
    #[must_use]
    pub fn data_map(&self) -> &Map<String, Value> {
        &self.data
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("hat_state", &self.hat_state.keys().collect::<Vec<_>>())
            .field(
                "stop_hooks",
                &self.stop_hooks.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("data", &self.data)
            .finish()
    }
}
