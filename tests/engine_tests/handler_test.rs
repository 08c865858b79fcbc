use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sandstep::{
    BinaryOperator, ErrorCode, Expression as E, Interpreter, LValue, ProcedureDef, Program,
    RuntimeResult, Step, StepKind, UserPrompter, Value,
};

use super::Recorder;

fn procedure(name: &str, params: &[&str], body: Vec<Step>) -> ProcedureDef {
    ProcedureDef {
        name: name.to_string(),
        required_params: params.iter().map(|p| p.to_string()).collect(),
        body,
        ..Default::default()
    }
}

fn error_field(field: &str) -> E {
    E::Index {
        target: Box::new(E::var("system_error")),
        index: Box::new(E::string(field)),
    }
}

async fn interpreter_with(procedures: Vec<ProcedureDef>) -> (Interpreter, Recorder) {
    let recorder = Recorder::default();
    let interp = Interpreter::builder()
        .host(recorder.host())
        .build()
        .unwrap();
    interp
        .load(Program {
            procedures,
            ..Default::default()
        })
        .await
        .unwrap();
    (interp, recorder)
}

#[tokio::test]
async fn test_handler_recovers_division_by_zero() -> RuntimeResult<()> {
    let (interp, recorder) = interpreter_with(vec![procedure(
        "safe_div",
        &["a", "b"],
        vec![
            Step::set("r", E::number(-1)),
            Step::set("r", E::binary(BinaryOperator::Divide, E::var("a"), E::var("b"))),
            Step::ret(E::var("r")),
            Step::on_error(vec![Step::emit(error_field("kind")), Step::clear_error()]),
        ],
    )])
    .await;

    let ok = interp
        .run("safe_div", vec![Value::from(10i64), Value::from(4i64)])
        .await?;
    assert_eq!(ok, Value::Number(2.5));

    let recovered = interp
        .run("safe_div", vec![Value::from(1i64), Value::from(0i64)])
        .await?;
    assert_eq!(recovered, Value::Number(-1.0));
    assert_eq!(recorder.emitted(), vec![Value::from("DivisionByZero")]);
    Ok(())
}

#[tokio::test]
async fn test_callee_error_reaches_caller_handler() -> RuntimeResult<()> {
    let (interp, recorder) = interpreter_with(vec![
        procedure("inner", &[], vec![Step::fail("inner broke")]),
        procedure(
            "outer",
            &[],
            vec![
                Step::call("inner", vec![]),
                Step::ret(E::string("resumed")),
                Step::on_error(vec![
                    Step::emit(error_field("message")),
                    Step::emit(error_field("code")),
                    Step::clear_error(),
                ]),
            ],
        ),
    ])
    .await;

    let value = interp.run("outer", vec![]).await?;
    assert_eq!(value, Value::from("resumed"));
    assert_eq!(
        recorder.emitted(),
        vec![
            Value::from("inner broke"),
            Value::from(ErrorCode::FailStatement.status() as i64),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_unhandled_error_sets_outcome_status() {
    let (interp, recorder) = interpreter_with(vec![procedure(
        "check",
        &["v"],
        vec![
            Step::at(
                4,
                3,
                StepKind::MustBe {
                    check: "is_number".to_string(),
                    args: vec![E::var("v")],
                },
            ),
            Step::emit(E::string("checked")),
        ],
    )])
    .await;

    let outcome = interp
        .execute(vec![Step::call("check", vec![E::string("nope")])])
        .await;
    assert!(!outcome.is_success());
    assert_eq!(outcome.status, ErrorCode::MustFailed.status());
    let err = outcome.error.unwrap();
    assert_eq!(err.position.map(|p| (p.line, p.column)), Some((4, 3)));
    assert!(recorder.emitted().is_empty());

    let outcome = interp
        .execute(vec![Step::call("check", vec![E::number(1)])])
        .await;
    assert!(outcome.is_success());
    assert_eq!(recorder.emitted(), vec![Value::from("checked")]);
}

#[tokio::test]
async fn test_handler_can_rethrow_with_bare_fail() {
    let (interp, recorder) = interpreter_with(vec![procedure(
        "strict",
        &[],
        vec![
            Step::call("missing_procedure", vec![]),
            Step::on_error(vec![
                Step::emit(E::string("logging then rethrow")),
                Step::new(StepKind::Fail(None)),
            ]),
        ],
    )])
    .await;

    let err = interp.run("strict", vec![]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProcNotFound);
    assert_eq!(recorder.emitted(), vec![Value::from("logging then rethrow")]);
}

/// Answers every prompt with a fixed value and keeps the questions.
struct CannedAnswer {
    answer: Value,
    questions: Mutex<Vec<String>>,
}

#[async_trait]
impl UserPrompter for CannedAnswer {
    async fn prompt(&self, message: &str) -> RuntimeResult<Value> {
        self.questions.lock().unwrap().push(message.to_string());
        Ok(self.answer.clone())
    }
}

fn prompt_user(question: &str, into: &str) -> Step {
    Step::new(StepKind::PromptUser {
        prompt: E::string(question),
        into: LValue::var(into),
    })
}

#[tokio::test]
async fn test_promptuser_assigns_the_answer() -> RuntimeResult<()> {
    let prompter = Arc::new(CannedAnswer {
        answer: Value::from("Ada"),
        questions: Mutex::new(vec![]),
    });
    let recorder = Recorder::default();
    let interp = Interpreter::builder()
        .host(recorder.host().with_prompter(prompter.clone()))
        .build()
        .unwrap();

    let value = interp
        .execute(vec![
            prompt_user("your name?", "name"),
            Step::emit(E::binary(BinaryOperator::Add, E::string("hi "), E::var("name"))),
            Step::ret(E::var("name")),
        ])
        .await
        .into_result()?;

    assert_eq!(value, Value::from("Ada"));
    assert_eq!(recorder.emitted(), vec![Value::from("hi Ada")]);
    assert_eq!(*prompter.questions.lock().unwrap(), vec!["your name?".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_promptuser_without_prompter_is_internal() {
    let (interp, recorder) = interpreter_with(vec![]).await;

    let outcome = interp
        .execute(vec![
            prompt_user("anyone there?", "reply"),
            Step::emit(E::string("unreachable")),
        ])
        .await;
    assert_eq!(outcome.status, ErrorCode::Internal.status());
    assert!(outcome.error.unwrap().message.contains("prompter"));
    assert!(recorder.emitted().is_empty());
}
