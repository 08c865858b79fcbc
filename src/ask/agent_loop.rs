use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, Position, RuntimeError, RuntimeResult};
use crate::eval::context::Interpreter;
use crate::eval::procedure::Commands;
use crate::eval::statement::StepExecutor;
use crate::eval::value::Value;
use crate::provider::{AIProvider, ChatRequest, ProviderContext};
use crate::store::{AgentModel, AgentModelReader};

use super::envelope::{Envelope, LoopSignal};

/// Why a conversation ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    Done,
    NoSignal,
    UnknownSignal,
    MaxTurns,
    Stalled,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    Continue,
    Stop(StopReason),
    Abort(String),
    /// The model asked for another turn but is not allowed to loop.
    Rejected,
}

/// Decides what happens after `turn`. Checks run in a fixed order: the
/// reply's signal first, then loop permission, the turn ceiling and the
/// progress guard.
pub(crate) fn decide(
    model: &AgentModel,
    signal: Option<LoopSignal>,
    reason: Option<&str>,
    turn: usize,
    previous_output: Option<&str>,
    output: &str,
) -> Decision {
    match signal {
        None => Decision::Stop(StopReason::NoSignal),
        Some(LoopSignal::Done) => Decision::Stop(StopReason::Done),
        Some(LoopSignal::Unknown(_)) => Decision::Stop(StopReason::UnknownSignal),
        Some(LoopSignal::Abort) => Decision::Abort(reason.unwrap_or("no reason given").to_string()),
        Some(LoopSignal::Continue) => {
            if !model.allow_loop {
                Decision::Rejected
            } else if turn >= model.max_turns {
                Decision::Stop(StopReason::MaxTurns)
            } else if previous_output == Some(output) {
                Decision::Stop(StopReason::Stalled)
            } else {
                Decision::Continue
            }
        }
    }
}

/// Runs an `ask` step: converses with the agent model until it stops and
/// returns the output of the last turn.
#[tracing::instrument(skip(interp, agent_model, prompt), fields(agent_model = %agent_model), level = "debug")]
pub async fn ask(
    interp: &Interpreter,
    agent_model: &Value,
    prompt: &Value,
    position: Position,
) -> RuntimeResult<Value> {
    let model_name = agent_model.as_str().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "agent model name must be a string, got {}",
            agent_model.type_name()
        ))
        .with_position(position)
    })?;

    let services = interp.services();
    let model = AgentModelReader::new(services.agent_models.clone())
        .get(model_name)
        .await
        .map_err(|e| RuntimeError::from(e).with_position(position))?;
    let provider = services
        .providers
        .get_provider(&model.provider)
        .await
        .map_err(|e| {
            RuntimeError::new(
                ErrorCode::KeyNotFound,
                format!("provider for agent model '{}' is not registered", model.name),
            )
            .with_cause(e)
            .with_position(position)
        })?;
    let api_key = match &model.account {
        Some(account) => {
            services
                .accounts
                .get(account)
                .await
                .map_err(|e| RuntimeError::from(e).with_position(position))?
                .api_key
        }
        None => SecretString::default(),
    };

    let conversation = Conversation {
        interp,
        provider,
        model,
        api_key,
        prompt: prompt.to_json(),
        trace_id: Uuid::new_v4().to_string(),
        position,
    };
    conversation.run().await.map(Value::String)
}

struct Conversation<'a> {
    interp: &'a Interpreter,
    provider: Arc<dyn AIProvider>,
    model: AgentModel,
    api_key: SecretString,
    prompt: JsonValue,
    trace_id: String,
    position: Position,
}

impl Conversation<'_> {
    async fn run(&self) -> RuntimeResult<String> {
        let mut previous: Option<String> = None;
        let mut turn = 1;
        loop {
            let reply = self.exchange(turn, previous.as_deref()).await?;
            let output = self.run_actions(&reply, turn).await?;

            let decision = decide(
                &self.model,
                reply.loop_control.signal(),
                reply.loop_control.reason.as_deref(),
                turn,
                previous.as_deref(),
                &output,
            );
            debug!(turn, ?decision, notes = ?reply.loop_control.notes, "agent turn finished");

            match decision {
                Decision::Continue => {
                    previous = Some(output);
                    turn += 1;
                }
                Decision::Stop(reason) => {
                    if reason == StopReason::Stalled {
                        warn!(turn, model = %self.model.name, "agent repeated its output, stopping");
                    }
                    info!(turns = turn, %reason, model = %self.model.name, "agent conversation finished");
                    return Ok(output);
                }
                Decision::Abort(reason) => {
                    return Err(self.error(
                        ErrorCode::External,
                        format!("agent '{}' aborted: {}", self.model.name, reason),
                    ))
                }
                Decision::Rejected => {
                    return Err(self.error(
                        ErrorCode::Policy,
                        format!(
                            "agent model '{}' does not allow looping (turn {} requested)",
                            self.model.name,
                            turn + 1
                        ),
                    ))
                }
            }
        }
    }

    async fn exchange(&self, turn: usize, previous: Option<&str>) -> RuntimeResult<Envelope> {
        let config = &self.interp.config().ask;
        let prompt = Envelope::request(&self.model.name, self.prompt.clone(), turn, previous)
            .to_prompt()
            .map_err(|e| self.error(ErrorCode::Internal, e.to_string()))?;
        let request = ChatRequest {
            model_name: self.model.model.clone(),
            prompt,
            api_key: self.api_key.clone(),
            temperature: self.model.temperature.unwrap_or(config.temperature),
            max_tokens: config.max_tokens,
        };
        let context = ProviderContext {
            trace_id: self.trace_id.clone(),
            turn,
            deadline: self.interp.host().deadline,
        };

        let response = self.provider.chat(&context, &request).await.map_err(|e| {
            debug!(provider = self.provider.name(), turn, error = %e, "provider call failed");
            RuntimeError::from(e).with_position(self.position)
        })?;

        Envelope::parse(&response.text_content).map_err(|e| {
            self.error(
                ErrorCode::Parse,
                format!("malformed reply from agent '{}'", self.model.name),
            )
            .with_cause(e)
        })
    }

    /// Runs the reply's actions in a fresh fork. Whatever they emit, one
    /// line per value, is the turn output.
    async fn run_actions(&self, reply: &Envelope, turn: usize) -> RuntimeResult<String> {
        let steps = self
            .interp
            .services()
            .parser
            .parse_commands(&reply.actions_source())
            .map_err(|e| RuntimeError::from(e).with_position(self.position))?;
        let commands = Commands::from_steps(steps).map_err(|e| e.at_if_unknown(self.position))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let host = self.interp.host().clone().with_emit(move |value: Value| {
            let _ = tx.send(value.to_string());
        });

        let fork = self
            .interp
            .fork_with(
                &format!("ask:{}#{}", self.model.name, turn),
                commands.error_handler.clone(),
                Some(Arc::new(host)),
            )
            .await?;
        StepExecutor::new()
            .run(&commands.body, &fork, false, None)
            .await
            .map_err(RuntimeError::into_caller_error)?;
        drop(fork);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    fn error(&self, code: ErrorCode, message: String) -> RuntimeError {
        RuntimeError::new(code, message).with_position(self.position)
    }
}
