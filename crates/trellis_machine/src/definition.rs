//! Machine definitions.
//!
//! A machine is an immutable document: states, transitions ("xitions")
//! between them, local schema definitions and hat declarations. The engine
//! interprets it; the hat composer extends it before a run.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use trellis_core::{CoreResult, StateId, XitionId};
use trellis_schema::{Registry, SchemaError, SchemaSource};

/// Definition errors found by [`Machine::check`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// Two states share an identifier
    #[error("Duplicate state: {state}")]
    DuplicateState {
        /// Repeated identifier
        state: StateId,
    },

    /// Two xitions share an identifier
    #[error("Duplicate xition: {xition}")]
    DuplicateXition {
        /// Repeated identifier
        xition: XitionId,
    },

    /// Xition names a state that is neither declared nor a sentinel
    #[error("Xition {xition} names unknown state {state}")]
    UnknownState {
        /// Offending xition
        xition: XitionId,
        /// Undeclared state
        state: StateId,
    },

    /// Machine-level hat names an undeclared state
    #[error("Hat {hat} targets unknown state {state}")]
    UnknownHatTarget {
        /// Hat name
        hat: String,
        /// Undeclared state
        state: StateId,
    },

    /// A local definition does not resolve
    #[error("Schema definition {name} is broken: {error}")]
    BrokenDefinition {
        /// Definition name
        name: String,
        /// Resolution failure
        error: SchemaError,
    },

    /// A xition's static schema does not resolve
    #[error("Schema of xition {xition} is broken: {error}")]
    BrokenSchema {
        /// Offending xition
        xition: XitionId,
        /// Resolution failure
        error: SchemaError,
    },
}

/// Hat declaration on a state
///
/// Written either as a bare name (`"echo"`) or as a single-key map
/// (`{"mcp": {"command": "server"}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct HatDecl {
    /// Hat name, looked up in the hat registry
    pub name: String,
    /// Hat configuration (`null` for bare names)
    pub config: Value,
}

impl HatDecl {
    /// Declaration without configuration
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Value::Null,
        }
    }

    /// Declaration with configuration
    #[must_use]
    pub fn configured(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl TryFrom<Value> for HatDecl {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(Self::bare(name)),
            Value::Object(map) if map.len() == 1 => {
                let (name, config) = map.into_iter().next().ok_or("empty hat declaration")?;
                Ok(Self::configured(name, config))
            }
            other => Err(format!(
                "hat declaration must be a name or a single-key map, got {}",
                other
            )),
        }
    }
}

impl From<HatDecl> for Value {
    fn from(decl: HatDecl) -> Self {
        if decl.config.is_null() {
            Value::String(decl.name)
        } else {
            let mut map = serde_json::Map::new();
            map.insert(decl.name, decl.config);
            Value::Object(map)
        }
    }
}

/// State of a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// State identifier
    pub id: StateId,
    /// Name of the action invoked when the state is entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Hats worn by this state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hats: Vec<HatDecl>,
    /// Prompt lines for LLM-driven actions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl State {
    /// Create a state without action
    #[must_use]
    pub fn new(id: impl Into<StateId>) -> Self {
        Self {
            id: id.into(),
            action: None,
            hats: Vec::new(),
            prompts: Vec::new(),
            description: None,
        }
    }

    /// Set the action
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Add a hat declaration
    #[must_use]
    pub fn with_hat(mut self, hat: HatDecl) -> Self {
        self.hats.push(hat);
        self
    }

    /// Add a prompt line
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompts.push(prompt.into());
        self
    }
}

/// Transition between two states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Xition {
    /// `[from, to]`
    pub id: XitionId,
    /// Schema every crossing event must satisfy
    #[serde(default)]
    pub schema: SchemaSource,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Xition {
    /// Create a xition accepting any message
    #[must_use]
    pub fn new(from: impl Into<StateId>, to: impl Into<StateId>) -> Self {
        Self {
            id: XitionId::new(from, to),
            schema: SchemaSource::any(),
            description: None,
        }
    }

    /// Set the schema
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaSource) -> Self {
        self.schema = schema;
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Machine definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Machine identifier
    pub id: String,
    /// Machine version
    pub version: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// States in declaration order
    #[serde(default)]
    pub states: Vec<State>,
    /// Transitions in declaration order
    #[serde(default)]
    pub xitions: Vec<Xition>,
    /// Local schema definitions
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub schemas: IndexMap<String, Value>,
    /// Machine-level hats: hat name to the states wearing it
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub hats: IndexMap<String, Vec<StateId>>,
}

impl Machine {
    /// Create an empty machine
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: None,
            states: Vec::new(),
            xitions: Vec::new(),
            schemas: IndexMap::new(),
            hats: IndexMap::new(),
        }
    }

    /// Parse a machine document
    ///
    /// # Errors
    ///
    /// Returns error if the document is not a machine definition
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as a pretty-printed document
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
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

    /// Add a local schema definition
    #[must_use]
    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    /// Declare a machine-level hat on a set of states
    #[must_use]
    pub fn with_machine_hat(mut self, hat: impl Into<String>, states: Vec<StateId>) -> Self {
        self.hats.insert(hat.into(), states);
        self
    }

    /// Find a state
    #[must_use]
    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.iter().find(|s| &s.id == id)
    }

    /// Find a state for modification
    pub fn state_mut(&mut self, id: &StateId) -> Option<&mut State> {
        self.states.iter_mut().find(|s| &s.id == id)
    }

    /// Find a xition
    #[must_use]
    pub fn xition(&self, id: &XitionId) -> Option<&Xition> {
        self.xitions.iter().find(|x| &x.id == id)
    }

    /// Xitions leaving a state
    pub fn xitions_from<'a>(&'a self, state: &'a StateId) -> impl Iterator<Item = &'a Xition> {
        self.xitions.iter().filter(move |x| x.id.from() == state)
    }

    /// Xitions entering a state
    pub fn xitions_into<'a>(&'a self, state: &'a StateId) -> impl Iterator<Item = &'a Xition> {
        self.xitions.iter().filter(move |x| x.id.to() == state)
    }

    /// Built-in registry composed with this machine's definitions
    #[must_use]
    pub fn registry(&self) -> Registry {
        Registry::builtin().compose(&self.schemas)
    }

    /// Check structural invariants
    ///
    /// # Errors
    ///
    /// Returns every violation found, not just the first.
    pub fn check(&self) -> Result<(), Vec<DefinitionError>> {
        let mut errors = Vec::new();

        let mut states = HashSet::new();
        for state in &self.states {
            if !states.insert(&state.id) {
                errors.push(DefinitionError::DuplicateState {
                    state: state.id.clone(),
                });
            }
        }

        let known = |id: &StateId| id.is_sentinel() || states.contains(id);

        let mut xitions = HashSet::new();
        for xition in &self.xitions {
            if !xitions.insert(&xition.id) {
                errors.push(DefinitionError::DuplicateXition {
                    xition: xition.id.clone(),
                });
            }
            for end in [xition.id.from(), xition.id.to()] {
                if !known(end) {
                    errors.push(DefinitionError::UnknownState {
                        xition: xition.id.clone(),
                        state: end.clone(),
                    });
                }
            }
        }

        for (hat, targets) in &self.hats {
            for state in targets.iter().filter(|s| !known(s)) {
                errors.push(DefinitionError::UnknownHatTarget {
                    hat: hat.clone(),
                    state: state.clone(),
                });
            }
        }

        let registry = self.registry();
        for (name, error) in registry.check() {
            errors.push(DefinitionError::BrokenDefinition { name, error });
        }
        for xition in &self.xitions {
            if let Some(schema) = xition.schema.as_static() {
                if let Err(error) = registry.resolve(&schema) {
                    errors.push(DefinitionError::BrokenSchema {
                        xition: xition.id.clone(),
                        error,
                    });
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn linear_machine() -> Machine {
        Machine::new("linear", "1")
            .with_state(State::new("working").with_action("work"))
            .with_xition(
                Xition::new("start", "working").with_schema(SchemaSource::literal(
                    json!({"type": "object", "required": ["text"]}),
                )),
            )
            .with_xition(Xition::new("working", "end"))
    }

    #[test]
    fn test_machine_check_ok() {
        assert!(linear_machine().check().is_ok());
    }

    #[test]
    fn test_machine_check_unknown_state() {
        let machine = linear_machine().with_xition(Xition::new("working", "nowhere"));
        let errors = machine.check().unwrap_err();
        assert_eq!(
            errors,
            vec![DefinitionError::UnknownState {
                xition: XitionId::new("working", "nowhere"),
                state: StateId::new("nowhere"),
            }]
        );
    }

    #[test]
    fn test_machine_check_duplicates() {
        let machine = linear_machine()
            .with_state(State::new("working"))
            .with_xition(Xition::new("working", "end"));
        let errors = machine.check().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], DefinitionError::DuplicateState { .. }));
        assert!(matches!(errors[1], DefinitionError::DuplicateXition { .. }));
    }

    #[test]
    fn test_machine_check_broken_refs() {
        let machine = linear_machine()
            .with_schema("loop", json!({"$ref": "#/$defs/loop"}))
            .with_xition(
                Xition::new("working", "working").with_schema(SchemaSource::local("ghost")),
            );
        let errors = machine.check().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::BrokenDefinition { name, .. } if name == "loop")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::BrokenSchema { .. })));
    }

    #[test]
    fn test_machine_check_machine_hat_targets() {
        let machine = linear_machine()
            .with_machine_hat("echo", vec![StateId::new("working"), StateId::new("ghost")]);
        let errors = machine.check().unwrap_err();
        assert_eq!(
            errors,
            vec![DefinitionError::UnknownHatTarget {
                hat: "echo".to_string(),
                state: StateId::new("ghost"),
            }]
        );
    }

    #[test]
    fn test_parse_document() {
        let machine = Machine::from_json(
            r##"{
                "id": "doc",
                "version": "2",
                "states": [
                    {"id": "worker", "action": "llm", "hats": ["echo", {"mcp": {"command": "srv"}}]}
                ],
                "xitions": [
                    {"id": ["start", "worker"], "schema": {"$ref": "#/$defs/request"}},
                    {"id": ["worker", "end"], "schema": "worker-done"},
                    {"id": ["worker", "worker"]}
                ],
                "schemas": {"request": {"type": "object"}},
                "hats": {"echo": ["worker"]}
            }"##,
        )
        .unwrap();

        let worker = machine.state(&StateId::new("worker")).unwrap();
        assert_eq!(worker.hats[0], HatDecl::bare("echo"));
        assert_eq!(worker.hats[1], HatDecl::configured("mcp", json!({"command": "srv"})));
        assert_eq!(machine.xitions[0].schema, SchemaSource::local("request"));
        assert_eq!(machine.xitions[1].schema, SchemaSource::dynamic("worker-done"));
        assert_eq!(machine.xitions[2].schema, SchemaSource::any());
        assert_eq!(machine.hats["echo"], vec![StateId::new("worker")]);
        assert!(machine.check().is_ok());
    }

    #[test]
    fn test_hat_decl_rejects_multi_key_map() {
        let result: Result<HatDecl, _> = serde_json::from_value(json!({"a": 1, "b": 2}));
        assert!(result.is_err());
        let result: Result<HatDecl, _> = serde_json::from_value(json!(3));
        assert!(result.is_err());
    }

    #[test]
    fn test_xitions_from_and_into() {
        let machine = linear_machine();
        let working = StateId::new("working");
        assert_eq!(machine.xitions_from(&working).count(), 1);
        assert_eq!(machine.xitions_into(&working).count(), 1);
    }

    fn name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,7}"
    }

    fn schema_source() -> impl Strategy<Value = SchemaSource> {
        prop_oneof![
            Just(SchemaSource::any()),
            name().prop_map(SchemaSource::local),
            name().prop_map(SchemaSource::dynamic),
            name().prop_map(|field| SchemaSource::literal(
                json!({"type": "object", "required": [field]})
            )),
        ]
    }

    fn hat_decl() -> impl Strategy<Value = HatDecl> {
        (name(), proptest::option::of(any::<i64>())).prop_map(|(name, config)| match config {
            Some(n) => HatDecl::configured(name, json!({ "n": n })),
            None => HatDecl::bare(name),
        })
    }

    fn state() -> impl Strategy<Value = State> {
        (
            name(),
            proptest::option::of(name()),
            proptest::collection::vec(hat_decl(), 0..3),
            proptest::collection::vec(".{0,12}", 0..3),
        )
            .prop_map(|(id, action, hats, prompts)| State {
                id: StateId::new(id),
                action,
                hats,
                prompts,
                description: None,
            })
    }

    fn machine() -> impl Strategy<Value = Machine> {
        (
            name(),
            "[0-9]{1,3}",
            proptest::collection::vec(state(), 1..5),
            proptest::collection::vec((name(), name(), schema_source()), 0..6),
            proptest::collection::vec((name(), any::<bool>()), 0..3),
            proptest::collection::vec((name(), proptest::collection::vec(name(), 0..3)), 0..2),
        )
            .prop_map(|(id, version, states, xitions, schemas, hats)| {
                let mut machine = Machine::new(id, version);
                machine.states = states;
                machine.xitions = xitions
                    .into_iter()
                    .map(|(from, to, schema)| Xition::new(from, to).with_schema(schema))
                    .collect();
                for (name, open) in schemas {
                    machine.schemas.insert(name, json!({"type": "object", "additionalProperties": open}));
                }
                for (hat, targets) in hats {
                    machine
                        .hats
                        .insert(hat, targets.into_iter().map(StateId::new).collect());
                }
                machine
            })
    }

    proptest! {
        #[test]
        fn prop_document_roundtrip(machine in machine()) {
            let json = machine.to_json_pretty().unwrap();
            let parsed = Machine::from_json(&json).unwrap();
            prop_assert_eq!(machine, parsed);
        }
    }
}
