use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sandstep::provider::{
    AIProvider, ChatRequest, ChatResponse, ProviderContext, ProviderError, ProviderRegistry,
    ProviderResult,
};
use sandstep::store::{Account, AccountStore, AgentModel, AgentModelStore};
use sandstep::{ErrorCode, Expression as E, Interpreter, RuntimeError, Step, Value};
use serde_json::json;

use super::Recorder;

/// Replays canned replies in order and remembers every request.
struct ScriptedProvider {
    replies: Vec<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(usize, serde_json::Value, String)>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(vec![]),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn request(&self, index: usize) -> serde_json::Value {
        self.requests.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl AIProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        context: &ProviderContext,
        request: &ChatRequest,
    ) -> ProviderResult<ChatResponse> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((
            context.turn,
            serde_json::from_str(&request.prompt).unwrap(),
            request.api_key.expose_secret().to_string(),
        ));
        let reply = self
            .replies
            .get(index)
            .or(self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(ChatResponse::text(reply))
    }
}

fn reply(lines: &[&str], signal: Option<&str>) -> String {
    let actions: Vec<Step> = lines.iter().map(|l| Step::emit(E::string(*l))).collect();
    let mut envelope = json!({ "actions": actions });
    if let Some(signal) = signal {
        envelope["loop"] = json!({ "signal": signal, "reason": "scripted" });
    }
    envelope.to_string()
}

struct Harness {
    interp: Interpreter,
    provider: Arc<ScriptedProvider>,
    recorder: Recorder,
}

async fn harness(model: AgentModel, replies: Vec<String>) -> Harness {
    let provider = ScriptedProvider::new(replies);
    let providers = Arc::new(ProviderRegistry::new());
    providers
        .register_provider("scripted", provider.clone())
        .await
        .unwrap();
    let recorder = Recorder::default();
    let interp = Interpreter::builder()
        .host(recorder.host())
        .providers(providers)
        .build()
        .unwrap();
    interp
        .services()
        .agent_models
        .register(model)
        .await
        .unwrap();
    Harness {
        interp,
        provider,
        recorder,
    }
}

async fn ask(interp: &Interpreter, model: &str) -> Result<Value, RuntimeError> {
    interp
        .execute(vec![
            Step::ask(model, E::string("plan a trip"), "answer"),
            Step::ret(E::var("answer")),
        ])
        .await
        .into_result()
}

#[tokio::test]
async fn test_loop_runs_until_done() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").looping(5),
        vec![
            reply(&["turn 1"], Some("continue")),
            reply(&["turn 2", "more"], Some("continue")),
            reply(&["turn 3"], Some("done")),
        ],
    )
    .await;

    let answer = ask(&h.interp, "helper").await.unwrap();
    assert_eq!(answer, Value::from("turn 3"));
    assert_eq!(h.provider.calls(), 3);

    let first = h.provider.request(0);
    assert_eq!(first["user_data"]["subject"], "helper");
    assert_eq!(first["user_data"]["fields"]["prompt"], "plan a trip");
    assert!(first["user_data"]["fields"].get("previous_output").is_none());
    let third = h.provider.request(2);
    assert_eq!(third["user_data"]["fields"]["turn"], 3);
    assert_eq!(third["user_data"]["fields"]["previous_output"], "turn 2\nmore");

    // 出力はホストに流れない
    assert!(h.recorder.emitted().is_empty());
}

#[tokio::test]
async fn test_loop_stops_at_max_turns() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").looping(2),
        vec![
            reply(&["turn 1"], Some("continue")),
            reply(&["turn 2"], Some("continue")),
            reply(&["turn 3"], Some("continue")),
        ],
    )
    .await;

    let answer = ask(&h.interp, "helper").await.unwrap();
    assert_eq!(answer, Value::from("turn 2"));
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_loop_stops_when_output_repeats() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").looping(5),
        vec![reply(&["same"], Some("continue"))],
    )
    .await;

    let answer = ask(&h.interp, "helper").await.unwrap();
    assert_eq!(answer, Value::from("same"));
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_missing_signal_stops_after_one_turn() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").looping(5),
        vec![reply(&["only"], None), reply(&["never"], Some("done"))],
    )
    .await;

    assert_eq!(ask(&h.interp, "helper").await.unwrap(), Value::from("only"));
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_unknown_model_fails_before_provider_call() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec![reply(&["x"], Some("done"))],
    )
    .await;

    let err = ask(&h.interp, "missing_agent").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_non_looping_model_rejects_continue() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec![reply(&["turn 1"], Some("continue"))],
    )
    .await;

    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Policy);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_abort_and_malformed_replies() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").looping(3),
        vec![reply(&[], Some("abort"))],
    )
    .await;
    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::External);
    assert!(err.message.contains("scripted"));

    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec!["I'd rather chat in prose".to_string()],
    )
    .await;
    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Parse);
}

#[tokio::test]
async fn test_account_credentials_reach_provider() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m").with_account("team"),
        vec![reply(&["ok"], Some("done"))],
    )
    .await;

    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::KeyNotFound);
    assert_eq!(h.provider.calls(), 0);

    h.interp
        .services()
        .accounts
        .register(Account::new("team", "scripted", "sk-test"))
        .await
        .unwrap();
    assert_eq!(ask(&h.interp, "helper").await.unwrap(), Value::from("ok"));
    assert_eq!(h.provider.requests.lock().unwrap()[0].2, "sk-test");
}

#[tokio::test]
async fn test_failing_action_fails_the_ask() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec![json!({
            "actions": [Step::call("no_such_procedure", vec![])],
            "loop": { "signal": "done" }
        })
        .to_string()],
    )
    .await;

    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProcNotFound);
}

struct Unreachable;

#[async_trait]
impl AIProvider for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn chat(&self, _: &ProviderContext, _: &ChatRequest) -> ProviderResult<ChatResponse> {
        Err(ProviderError::ApiError("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_provider_failure_is_external() {
    let providers = Arc::new(ProviderRegistry::new());
    providers
        .register_provider("unreachable", Arc::new(Unreachable))
        .await
        .unwrap();
    let interp = Interpreter::builder()
        .providers(providers)
        .build()
        .unwrap();
    interp
        .services()
        .agent_models
        .register(AgentModel::new("helper", "unreachable", "m"))
        .await
        .unwrap();

    let err = ask(&interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::External);
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_structured_prompt_is_sent_as_json() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec![reply(&["ok"], Some("done"))],
    )
    .await;

    let prompt = E::Map(vec![
        ("city".to_string(), E::string("Kyoto")),
        ("days".to_string(), E::number(3)),
        ("tags".to_string(), E::List(vec![E::string("food")])),
    ]);
    h.interp
        .execute(vec![Step::ask("helper", prompt, "answer")])
        .await
        .into_result()
        .unwrap();

    let fields = &h.provider.request(0)["user_data"]["fields"];
    assert_eq!(
        fields["prompt"],
        json!({ "city": "Kyoto", "days": 3.0, "tags": ["food"] })
    );
}

#[tokio::test]
async fn test_nested_error_handler_in_actions_is_rejected() {
    let h = harness(
        AgentModel::new("helper", "scripted", "m"),
        vec![json!({
            "actions": [Step::new(sandstep::StepKind::While {
                condition: E::bool(false),
                body: vec![Step::on_error(vec![])],
            })],
            "loop": { "signal": "done" }
        })
        .to_string()],
    )
    .await;

    let err = ask(&h.interp, "helper").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownKeyword);
}
