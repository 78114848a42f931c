//! Hat registry.

use crate::echo::EchoMaker;
use crate::hat::HatMaker;
use indexmap::IndexMap;
use std::sync::Arc;

/// Hat makers by name
#[derive(Clone, Default)]
pub struct HatRegistry {
    makers: IndexMap<String, Arc<dyn HatMaker>>,
}

impl HatRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `echo` hat
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with_maker(crate::echo::HAT_NAME, EchoMaker)
    }

    /// Register a maker; a later registration under the same name wins
    #[must_use]
    pub fn with_maker(mut self, name: impl Into<String>, maker: impl HatMaker + 'static) -> Self {
        self.makers.insert(name.into(), Arc::new(maker));
        self
    }

    /// Look up a maker
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn HatMaker>> {
        self.makers.get(name).cloned()
    }

    /// Check if a hat is known
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.makers.contains_key(name)
    }

    /// Registered hat names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.makers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HatRegistry")
            .field("makers", &self.makers.keys().collect::<Vec<_>>())
            .finish()
    }
}
