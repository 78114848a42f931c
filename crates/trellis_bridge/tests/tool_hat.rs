use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use trellis_bridge::{BridgeConfig, ToolSession, session_key};
use trellis_core::{StateId, XitionId};
use trellis_hat::apply_hats;
use trellis_machine::{
    Action, ActionError, ActionInput, ActionOutcome, Context, Engine, EngineConfig, EngineError,
    Event, FailureKind, HatDecl, Machine, State, Xition,
};

const SERVER: &str = env!("CARGO_BIN_EXE_trellis-mock-server");

fn server() -> Value {
    serde_json::to_value(BridgeConfig::new(SERVER).with_timeout(Duration::from_secs(10))).unwrap()
}

fn machine() -> Machine {
    Machine::new("tools", "1")
        .with_state(
            State::new("worker")
                .with_action("driver")
                .with_hat(HatDecl::configured("mcp", server())),
        )
        .with_xition(Xition::new("start", "worker"))
        .with_xition(Xition::new("worker", "end"))
}

/// Sends its entry message to the tool state, then finishes with the result
struct Driver;

#[async_trait]
impl Action for Driver {
    async fn invoke(
        &self,
        context: Context,
        input: ActionInput<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let me = input.state.id.clone();
        let next = if input.xition.from() == &me.suffixed("tool") {
            Event::new(XitionId::new(me, "end"), input.event.message.clone())
        } else {
            Event::new(XitionId::new(me.clone(), me.suffixed("tool")), input.event.message.clone())
        };
        Ok(ActionOutcome::emit(context, next))
    }
}

#[tokio::test]
async fn test_tool_round_trip() {
    let base = Context::new().with_action("driver", Driver);
    let (context, composed, report) = apply_hats(base, machine(), &trellis_bridge::registry())
        .await
        .unwrap();
    assert!(report.warnings.is_empty());
    assert!(composed.state(&StateId::new("worker-tool")).is_some());
    assert!(!composed.state(&StateId::new("worker")).unwrap().prompts.is_empty());
    assert_eq!(context.stop_hooks().len(), 1);

    let session = context
        .hat_state::<ToolSession>(&session_key(&StateId::new("worker")))
        .unwrap();

    let mut run = Engine::new(composed, context)
        .start(EngineConfig::default())
        .unwrap();
    run.submit(Event::new(
        XitionId::new("start", "worker"),
        json!({"name": "add", "arguments": {"a": 5, "b": 3}}),
    ))
    .unwrap();

    let outcome = run.wait(Duration::from_secs(10)).await;
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
            "[worker -> worker-tool]",
            "[worker-tool -> worker]",
            "[worker -> end]",
        ]
    );
    let back = &outcome.trail().records()[2].event;
    assert_eq!(back.message, json!(8));
    assert!(back.field("notifications").is_some());
    assert_eq!(outcome.trail().last().unwrap().event.message, json!(8));

    let shutdown = run.stop().await.unwrap();
    assert!(shutdown.hooks.is_clean());
    assert!(!session.bridge.is_open());
}

#[tokio::test]
async fn test_invalid_tool_call_is_rejected() {
    let base = Context::new().with_action("driver", Driver);
    let (context, composed, _) = apply_hats(base, machine(), &trellis_bridge::registry())
        .await
        .unwrap();

    let mut run = Engine::new(composed, context)
        .start(EngineConfig::default())
        .unwrap();
    run.submit(Event::new(
        XitionId::new("start", "worker"),
        json!({"name": "add", "arguments": {"a": "five", "b": 3}}),
    ))
    .unwrap();

    let outcome = run.wait(Duration::from_secs(10)).await;
    assert!(!outcome.is_completed());
    let failures: Vec<_> = outcome.trail().failures().collect();
    assert!(!failures.is_empty());
    let failure = failures[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Validation);

    run.stop().await.unwrap();
}

#[tokio::test]
async fn test_tool_error_reaches_outcome() {
    let base = Context::new().with_action("driver", Driver);
    let (context, composed, _) = apply_hats(base, machine(), &trellis_bridge::registry())
        .await
        .unwrap();

    let mut run = Engine::new(composed, context)
        .start(EngineConfig::default())
        .unwrap();
    run.submit(Event::new(
        XitionId::new("start", "worker"),
        json!({"name": "fail", "arguments": {"message": "boom"}}),
    ))
    .unwrap();

    let outcome = run.wait(Duration::from_secs(10)).await;
    assert!(!outcome.is_completed());
    match outcome.error() {
        Some(EngineError::Action(ActionError::ToolFailed {
            action,
            tool,
            arguments,
            error,
        })) => {
            assert_eq!(action, "worker-tool");
            assert_eq!(tool, "fail");
            assert_eq!(arguments, &json!({"message": "boom"}));
            assert!(error.contains("boom"), "{}", error);
        }
        other => panic!("expected tool failure, got {:?}", other),
    }
    let message = outcome.error().unwrap().to_string();
    assert!(message.contains("fail") && message.contains("boom"), "{}", message);

    run.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_is_reused() {
    let registry = trellis_bridge::registry();
    let key = session_key(&StateId::new("worker"));

    let (context, _, _) = apply_hats(Context::new(), machine(), &registry)
        .await
        .unwrap();
    let first = context.hat_state::<ToolSession>(&key).unwrap();

    let (context, composed, _) = apply_hats(context, machine(), &registry)
        .await
        .unwrap();
    let second = context.hat_state::<ToolSession>(&key).unwrap();

    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.bridge.id(), second.bridge.id());
    assert_eq!(context.stop_hooks().len(), 1);
    assert!(composed.check().is_ok());

    let (_, report) = trellis_machine::run_stop_hooks(context, Duration::from_secs(5)).await;
    assert!(report.is_clean());
    assert!(!first.bridge.is_open());
}

#[tokio::test]
async fn test_unreachable_server_fails_composition() {
    let machine = Machine::new("tools", "1").with_state(
        State::new("worker").with_hat(HatDecl::configured(
            "mcp",
            json!({"command": "/nonexistent/tool-server"}),
        )),
    );
    let result = apply_hats(Context::new(), machine, &trellis_bridge::registry()).await;
    assert!(matches!(result, Err(trellis_hat::HatError::Failed { .. })));
}
