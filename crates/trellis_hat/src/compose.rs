//! Hat composition.
//!
//! Every hat declaration of a machine is turned into a hat, applied to the
//! context, and its fragment merged into the machine. State-level
//! declarations come first (states in declaration order, hats left to
//! right), then machine-level ones. The context is folded through every
//! application.

use crate::error::HatResult;
use crate::fragment::Fragment;
use crate::hat::HatKind;
use crate::registry::HatRegistry;
use serde_json::Value;
use trellis_core::StateId;
use trellis_machine::{Context, Machine};

/// Non-fatal composition problems
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionWarning {
    /// Declaration names a hat the registry does not know
    UnknownHat {
        /// Hat name
        hat: String,
        /// State the hat was declared for
        state: StateId,
    },
    /// Fragment targets prompt lines at a state that does not exist
    UnknownPromptTarget {
        /// Hat that produced the fragment
        hat: String,
        /// Missing target
        target: StateId,
    },
}

impl std::fmt::Display for CompositionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownHat { hat, state } => {
                write!(f, "unknown hat {} on state {}; skipped", hat, state)
            }
            Self::UnknownPromptTarget { hat, target } => {
                write!(f, "hat {} adds prompts to unknown state {}", hat, target)
            }
        }
    }
}

/// One hat application
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedHat {
    /// Hat name
    pub hat: String,
    /// State it was applied to
    pub state: StateId,
    /// Static or dynamic
    pub kind: HatKind,
    /// What it added
    pub fragment: Fragment,
}

/// What composition did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeReport {
    /// Applications in order
    pub applied: Vec<AppliedHat>,
    /// Problems that did not stop composition
    pub warnings: Vec<CompositionWarning>,
}

impl ComposeReport {
    /// Fragments of static hats, in application order
    pub fn static_fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.applied
            .iter()
            .filter(|a| a.kind == HatKind::Static)
            .map(|a| &a.fragment)
    }
}

/// Apply every hat a machine declares
///
/// # Errors
///
/// Returns error if a hat rejects its config or fails to apply. Unknown hat
/// names are warnings.
pub async fn apply_hats(
    context: Context,
    machine: Machine,
    registry: &HatRegistry,
) -> HatResult<(Context, Machine, ComposeReport)> {
    let mut declarations: Vec<(String, StateId, Value)> = Vec::new();
    for state in &machine.states {
        for decl in &state.hats {
            declarations.push((decl.name.clone(), state.id.clone(), decl.config.clone()));
        }
    }
    for (hat, states) in &machine.hats {
        for state in states {
            declarations.push((hat.clone(), state.clone(), Value::Null));
        }
    }

    let mut context = context;
    let mut machine = machine;
    let mut report = ComposeReport::default();

    for (name, state, config) in declarations {
        let Some(maker) = registry.get(&name) else {
            tracing::warn!(hat = %name, state = %state, "unknown hat; capability omitted");
            report
                .warnings
                .push(CompositionWarning::UnknownHat { hat: name, state });
            continue;
        };

        let hat = maker.make(&state, &config)?;
        let kind = hat.kind();
        let (next, fragment) = hat.apply(context).await?;
        context = next;

        let (merged, missing) = fragment.clone().merge_into(machine);
        machine = merged;
        for target in missing {
            tracing::warn!(hat = %name, target = %target, "prompt target missing");
            report.warnings.push(CompositionWarning::UnknownPromptTarget {
                hat: name.clone(),
                target,
            });
        }

        tracing::debug!(
            hat = %name,
            state = %state,
            states = fragment.states.len(),
            xitions = fragment.xitions.len(),
            "hat applied"
        );
        report.applied.push(AppliedHat {
            hat: name,
            state,
            kind,
            fragment,
        });
    }

    Ok((context, machine, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HatError;
    use crate::hat::Hat;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use trellis_core::XitionId;
    use trellis_machine::{
        Action, ActionError, ActionInput, ActionOutcome, Engine, EngineConfig, Event, HatDecl,
        State, Xition,
    };

    fn machine() -> Machine {
        Machine::new("hatted", "1")
            .with_state(
                State::new("worker")
                    .with_action("ping")
                    .with_hat(HatDecl::bare("echo"))
                    .with_hat(HatDecl::configured("ghost", json!({"x": 1}))),
            )
            .with_state(State::new("helper").with_action("ping"))
            .with_xition(Xition::new("start", "worker"))
            .with_xition(Xition::new("worker", "end"))
            .with_machine_hat("echo", vec![StateId::new("helper")])
    }

    #[tokio::test]
    async fn test_apply_hats_order_and_warnings() {
        let (context, composed, report) =
            apply_hats(Context::new(), machine(), &HatRegistry::builtin())
                .await
                .unwrap();

        assert!(context.has_action("echo"));
        let applied: Vec<_> = report
            .applied
            .iter()
            .map(|a| (a.hat.as_str(), a.state.as_str()))
            .collect();
        assert_eq!(applied, vec![("echo", "worker"), ("echo", "helper")]);
        assert_eq!(
            report.warnings,
            vec![CompositionWarning::UnknownHat {
                hat: "ghost".to_string(),
                state: StateId::new("worker"),
            }]
        );

        assert!(composed.state(&StateId::new("worker-echo")).is_some());
        assert!(composed.state(&StateId::new("helper-echo")).is_some());
        assert!(composed.xition(&XitionId::new("helper-echo", "helper")).is_some());
        assert_eq!(
            composed.state(&StateId::new("worker")).unwrap().prompts.len(),
            1
        );
        assert!(composed.check().is_ok());
    }

    #[tokio::test]
    async fn test_static_hats_are_idempotent() {
        let context = Context::new();
        let registry = HatRegistry::builtin();

        let (_, first, first_report) = apply_hats(context.clone(), machine(), &registry)
            .await
            .unwrap();
        let (_, second, second_report) = apply_hats(context, machine(), &registry).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first_report.static_fragments().collect::<Vec<_>>(),
            second_report.static_fragments().collect::<Vec<_>>()
        );
    }

    /// Linear machines whose states wear `echo` per state, per machine, or not at all
    fn echo_machine() -> impl Strategy<Value = Machine> {
        proptest::collection::vec((any::<bool>(), any::<bool>()), 1..6).prop_map(|states| {
            let mut machine = Machine::new("generated", "1");
            let mut listed = Vec::new();
            let mut previous = StateId::new("start");
            for (i, (own, machine_wide)) in states.into_iter().enumerate() {
                let id = StateId::new(format!("s{}", i));
                let mut state = State::new(id.clone()).with_action("ping");
                if own {
                    state = state.with_hat(HatDecl::bare("echo"));
                } else if machine_wide {
                    listed.push(id.clone());
                }
                machine = machine
                    .with_state(state)
                    .with_xition(Xition::new(previous, id.clone()));
                previous = id;
            }
            machine = machine.with_xition(Xition::new(previous, "end"));
            if !listed.is_empty() {
                machine = machine.with_machine_hat("echo", listed);
            }
            machine
        })
    }

    fn wearers(machine: &Machine) -> Vec<StateId> {
        let mut ids: Vec<StateId> = machine
            .states
            .iter()
            .filter(|s| s.hats.iter().any(|h| h.name == "echo"))
            .map(|s| s.id.clone())
            .collect();
        if let Some(listed) = machine.hats.get("echo") {
            ids.extend(listed.iter().cloned());
        }
        ids
    }

    proptest! {
        #[test]
        fn prop_echo_hats_are_idempotent(machine in echo_machine()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let registry = HatRegistry::builtin();
            let ((_, first, first_report), (_, second, second_report)) = runtime.block_on(async {
                let first = apply_hats(Context::new(), machine.clone(), &registry).await.unwrap();
                let second = apply_hats(Context::new(), machine.clone(), &registry).await.unwrap();
                (first, second)
            });

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(
                first_report.static_fragments().collect::<Vec<_>>(),
                second_report.static_fragments().collect::<Vec<_>>()
            );
            prop_assert!(first.check().is_ok());

            let wearers = wearers(&machine);
            prop_assert_eq!(first.states.len(), machine.states.len() + wearers.len());
            for id in &wearers {
                let echo = id.suffixed("echo");
                prop_assert!(first.state(&echo).is_some());
                prop_assert!(first.xition(&XitionId::new(echo, id.clone())).is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_prompt_target_warns() {
        struct Stray;

        #[async_trait]
        impl Hat for Stray {
            fn kind(&self) -> HatKind {
                HatKind::Static
            }

            async fn apply(&self, context: Context) -> HatResult<(Context, Fragment)> {
                Ok((context, Fragment::new().with_prompt("nowhere", "lost line")))
            }
        }

        let registry = HatRegistry::new().with_maker(
            "stray",
            |_: &StateId, _: &Value| -> HatResult<Box<dyn Hat>> { Ok(Box::new(Stray)) },
        );
        let machine = Machine::new("m", "1")
            .with_state(State::new("a").with_action("x").with_hat(HatDecl::bare("stray")));

        let (_, composed, report) = apply_hats(Context::new(), machine.clone(), &registry)
            .await
            .unwrap();
        assert_eq!(composed, machine);
        assert_eq!(
            report.warnings,
            vec![CompositionWarning::UnknownPromptTarget {
                hat: "stray".to_string(),
                target: StateId::new("nowhere"),
            }]
        );
    }

    #[tokio::test]
    async fn test_maker_error_propagates() {
        let registry = HatRegistry::new().with_maker(
            "strict",
            |state: &StateId, config: &Value| -> HatResult<Box<dyn Hat>> {
                Err(HatError::invalid_config("strict", state, config.to_string()))
            },
        );
        let machine = Machine::new("m", "1").with_state(
            State::new("a").with_hat(HatDecl::configured("strict", json!({"bad": true}))),
        );
        let result = apply_hats(Context::new(), machine, &registry).await;
        assert!(matches!(result, Err(HatError::InvalidConfig { .. })));
    }

    /// Visits the echo state once, then finishes
    struct Ping;

    #[async_trait]
    impl Action for Ping {
        async fn invoke(
            &self,
            context: Context,
            input: ActionInput<'_>,
        ) -> Result<ActionOutcome, ActionError> {
            let me = input.state.id.clone();
            let next = if input.xition.from() == &me.suffixed("echo") {
                Event::new(XitionId::new(me, "end"), input.event.message.clone())
            } else {
                Event::new(XitionId::new(me.clone(), me.suffixed("echo")), json!("marco"))
            };
            Ok(ActionOutcome::emit(context, next))
        }
    }

    #[tokio::test]
    async fn test_composed_machine_runs_through_echo() {
        let base = Context::new().with_action("ping", Ping);
        let (context, composed, _) = apply_hats(base, machine(), &HatRegistry::builtin())
            .await
            .unwrap();

        let run = Engine::new(composed, context)
            .start(EngineConfig::default())
            .unwrap();
        run.submit(Event::new(XitionId::new("start", "worker"), json!("go")))
            .unwrap();

        let outcome = run.wait(Duration::from_secs(5)).await;
        assert!(outcome.is_completed(), "{:?}", outcome);
        let hops: Vec<String> = outcome
            .trail()
            .iter()
            .map(|r| r.event.id.to_string())
            .collect();
        assert_eq!(
            hops,
            vec![
                "[start -> worker]",
                "[worker -> worker-echo]",
                "[worker-echo -> worker]",
                "[worker -> end]",
            ]
        );
        assert_eq!(outcome.trail().last().unwrap().event.message, json!("marco"));
        assert!(outcome.trail().is_contiguous());
    }
}
