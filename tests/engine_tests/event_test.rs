use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandstep::{
    EventDecl, Expression as E, Interpreter, Position, Program, RuntimeResult, Step, StepKind,
    Tool, ToolRegistry, ToolSpec, Value,
};

use super::Recorder;

struct Explode;

#[async_trait]
impl Tool for Explode {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("explode", "panics")
    }

    async fn call(&self, _interp: &Interpreter, _args: Vec<Value>) -> RuntimeResult<Value> {
        panic!("tool exploded");
    }
}

fn handler(name: &str, body: Vec<Step>) -> EventDecl {
    EventDecl {
        name: E::string("tick"),
        handler_name: Some(name.to_string()),
        payload_variable: Some("evt".to_string()),
        body,
        position: Position::new(1, 1),
    }
}

fn payload_of_event() -> E {
    E::Index {
        target: Box::new(E::var("evt")),
        index: Box::new(E::string("payload")),
    }
}

async fn interpreter(handlers: Vec<EventDecl>) -> (Interpreter, Recorder) {
    let recorder = Recorder::default();
    let tools = ToolRegistry::with_builtins();
    tools.register(Arc::new(Explode));
    let interp = Interpreter::builder()
        .host(recorder.host())
        .tools(Arc::new(tools))
        .build()
        .unwrap();
    interp
        .load(Program {
            events: handlers,
            ..Default::default()
        })
        .await
        .unwrap();
    (interp, recorder)
}

#[tokio::test]
async fn test_failing_handler_does_not_affect_siblings() {
    let (interp, recorder) = interpreter(vec![
        handler("echo", vec![Step::emit(payload_of_event())]),
        handler("broken", vec![Step::fail("handler broke")]),
    ])
    .await;

    let dispatch = interp.emit_event("tick", "timer", Value::from(7i64)).await;
    assert_eq!(dispatch.handler_count(), 2);
    dispatch.join().await;

    assert_eq!(recorder.emitted(), vec![Value::from(7i64)]);
    let errors = recorder.event_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "tick");
    assert_eq!(errors[0].1, "timer");
    assert!(errors[0].2.contains("handler broke"));
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let (interp, recorder) = interpreter(vec![
        handler("crash", vec![Step::call("explode", vec![])]),
        handler("echo", vec![Step::emit(payload_of_event())]),
        handler("echo_again", vec![Step::emit(E::string("second"))]),
    ])
    .await;

    let dispatch = interp.emit_event("tick", "timer", Value::from("p")).await;
    dispatch.join().await;

    let mut emitted = recorder.emitted();
    emitted.sort_by_key(|v| v.to_string());
    assert_eq!(emitted, vec![Value::from("p"), Value::from("second")]);
    let errors = recorder.event_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("tool exploded"));
}

#[tokio::test]
async fn test_script_emission_returns_before_handlers_fail() {
    let (interp, recorder) = interpreter(vec![handler(
        "broken",
        vec![Step::fail("late failure")],
    )])
    .await;

    let outcome = interp
        .execute(vec![
            Step::call(
                "emit_event",
                vec![E::string("tick"), E::string("script"), E::number(1)],
            ),
            Step::ret(E::string("emitter done")),
        ])
        .await;
    assert!(outcome.is_success());
    assert_eq!(outcome.value, Value::from("emitter done"));

    for _ in 0..100 {
        if !recorder.event_errors().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let errors = recorder.event_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "script");
}

#[tokio::test]
async fn test_unhandled_event_is_ignored() {
    let (interp, recorder) = interpreter(vec![]).await;
    let dispatch = interp.emit_event("nobody_listens", "test", Value::Nil).await;
    assert!(dispatch.is_empty());
    dispatch.join().await;
    assert!(recorder.event_errors().is_empty());
}

#[tokio::test]
async fn test_handler_sees_canonical_event() {
    let (interp, recorder) = interpreter(vec![handler(
        "inspect",
        vec![
            Step::emit(E::Index {
                target: Box::new(E::var("evt")),
                index: Box::new(E::string("name")),
            }),
            Step::emit(E::Index {
                target: Box::new(E::var("evt")),
                index: Box::new(E::string("source")),
            }),
        ],
    )])
    .await;

    interp
        .emit_event("tick", "clock", Value::Nil)
        .await
        .join()
        .await;
    assert_eq!(
        recorder.emitted(),
        vec![Value::from("tick"), Value::from("clock")]
    );
}

#[tokio::test]
async fn test_whisper_reaches_host_callback() {
    let (interp, recorder) = interpreter(vec![handler(
        "notify",
        vec![Step::new(StepKind::Whisper {
            handle: E::string("ops"),
            data: payload_of_event(),
        })],
    )])
    .await;

    interp
        .emit_event("tick", "timer", Value::from("disk full"))
        .await
        .join()
        .await;

    assert_eq!(
        recorder.whispered(),
        vec![(Value::from("ops"), Value::from("disk full"))]
    );
    assert!(recorder.emitted().is_empty());
    assert!(recorder.event_errors().is_empty());
}

#[tokio::test]
async fn test_return_ends_handler_quietly() {
    let (interp, recorder) = interpreter(vec![handler(
        "early_exit",
        vec![
            Step::emit(E::string("before")),
            Step::ret(E::string("done")),
            Step::emit(E::string("after")),
        ],
    )])
    .await;

    interp.emit_event("tick", "timer", Value::Nil).await.join().await;

    assert_eq!(recorder.emitted(), vec![Value::from("before")]);
    assert!(recorder.event_errors().is_empty());
}
