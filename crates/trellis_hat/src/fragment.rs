//! Hat fragments and their merge into a machine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use trellis_core::StateId;
use trellis_machine::{Machine, State, Xition};

/// What a hat adds to a machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// States to add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<State>,
    /// Xitions to add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xitions: Vec<Xition>,
    /// Prompt lines to append, by target state
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub prompts: IndexMap<StateId, Vec<String>>,
}

impl Fragment {
    /// Create an empty fragment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Add a xition
    #[must_use]
    pub fn with_xition(mut self, xition: Xition) -> Self {
        self.xitions.push(xition);
        self
    }

    /// Append a prompt line to a target state
    #[must_use]
    pub fn with_prompt(mut self, target: impl Into<StateId>, line: impl Into<String>) -> Self {
        self.prompts.entry(target.into()).or_default().push(line.into());
        self
    }

    /// Check if the fragment adds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.xitions.is_empty() && self.prompts.is_empty()
    }

    /// Merge into a machine
    ///
    /// States and xitions are appended; prompt lines are appended to their
    /// target state. Targets that do not exist after the states are added
    /// are returned and their lines dropped.
    #[must_use]
    pub fn merge_into(self, mut machine: Machine) -> (Machine, Vec<StateId>) {
        machine.states.extend(self.states);
        machine.xitions.extend(self.xitions);

        let mut missing = Vec::new();
        for (target, lines) in self.prompts {
            match machine.state_mut(&target) {
                Some(state) => state.prompts.extend(lines),
                None => missing.push(target),
            }
        }
        (machine, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Machine {
        Machine::new("host", "1")
            .with_state(State::new("a").with_prompt("base"))
            .with_state(State::new("b"))
            .with_xition(Xition::new("start", "a"))
    }

    #[test]
    fn test_merge_appends_and_targets_prompts() {
        let fragment = Fragment::new()
            .with_state(State::new("a-echo"))
            .with_xition(Xition::new("a", "a-echo"))
            .with_prompt("a", "extra")
            .with_prompt("a-echo", "echo line");

        let (machine, missing) = fragment.merge_into(host());

        assert!(missing.is_empty());
        assert_eq!(machine.states.len(), 3);
        assert_eq!(machine.xitions.len(), 2);
        let a = machine.state(&StateId::new("a")).unwrap();
        assert_eq!(a.prompts, vec!["base".to_string(), "extra".to_string()]);
        assert!(machine.state(&StateId::new("b")).unwrap().prompts.is_empty());
        assert_eq!(
            machine.state(&StateId::new("a-echo")).unwrap().prompts,
            vec!["echo line".to_string()]
        );
    }

    #[test]
    fn test_merge_reports_missing_targets() {
        let fragment = Fragment::new().with_prompt("ghost", "lost");
        let (machine, missing) = fragment.merge_into(host());
        assert_eq!(missing, vec![StateId::new("ghost")]);
        assert_eq!(machine, host());
    }

    #[test]
    fn test_empty_fragment() {
        assert!(Fragment::new().is_empty());
        let (machine, missing) = Fragment::new().merge_into(host());
        assert_eq!(machine, host());
        assert!(missing.is_empty());
    }
}
