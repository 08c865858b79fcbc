//! Step executor.
//!
//! A block runs step by step in declaration order. A step either proceeds,
//! returns from the frame, or (inside a handler) clears the active error.
//! Failures unwind through [`StepExecutor::run`], which gives the frame's
//! `on_error` handler one chance to recover before the error leaves the
//! frame.

use async_recursion::async_recursion;
use tracing::{debug, info};

use crate::ast::{Expression, LValue, Step, StepKind};
use crate::error::{ErrorCode, RuntimeError, RuntimeResult};

use super::context::Interpreter;
use super::expression::{list_index, ExpressionEvaluator};
use super::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockOutcome {
    /// Returned value, or the value of the last step.
    pub value: Value,
    pub returned: bool,
    /// A `clear_error` ran somewhere in this block.
    pub cleared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Signal {
    Proceed,
    Return,
    Cleared,
}

#[derive(Debug)]
struct StepResult {
    value: Value,
    signal: Signal,
}

impl StepResult {
    fn proceed(value: Value) -> Self {
        Self {
            value,
            signal: Signal::Proceed,
        }
    }

    fn from_block(outcome: BlockOutcome) -> Self {
        let signal = if outcome.returned {
            Signal::Return
        } else if outcome.cleared {
            Signal::Cleared
        } else {
            Signal::Proceed
        };
        Self {
            value: outcome.value,
            signal,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StepExecutor {
    expression_evaluator: ExpressionEvaluator,
}

impl StepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `steps` in `interp`.
    ///
    /// `in_handler` marks execution of an `on_error` body: errors there abort
    /// at once, `return` is illegal and `clear_error` is allowed.
    /// `active_error` is the error the handler is reacting to.
    #[async_recursion]
    pub async fn run(
        &self,
        steps: &[Step],
        interp: &Interpreter,
        in_handler: bool,
        active_error: Option<RuntimeError>,
    ) -> RuntimeResult<BlockOutcome> {
        let mut last = Value::Nil;
        let mut cleared = false;

        for step in steps {
            let result = self
                .exec_step(step, interp, in_handler, active_error.as_ref())
                .await;
            match result {
                Ok(StepResult { value, signal }) => match signal {
                    Signal::Proceed => last = value,
                    Signal::Cleared => {
                        cleared = true;
                        last = value;
                    }
                    Signal::Return => {
                        return Ok(BlockOutcome {
                            value,
                            returned: true,
                            cleared,
                        })
                    }
                },
                Err(err) => {
                    let err = err.at_if_unknown(step.position);
                    if err.is_control() || in_handler || err.handled {
                        return Err(err);
                    }
                    let Some(handler) = interp.error_handler() else {
                        return Err(err);
                    };

                    debug!(code = %err.code, step = step.name(), "running on_error handler");
                    interp.bind_local(&interp.config().error_variable, err.to_value());
                    match self.run(&handler, interp, true, Some(err.clone())).await {
                        Ok(outcome) if outcome.cleared => {
                            debug!(code = %err.code, "error cleared, resuming after failing step");
                            last = Value::Nil;
                        }
                        Ok(_) => return Err(err.mark_handled()),
                        Err(handler_err) => return Err(handler_err.mark_handled()),
                    }
                }
            }
        }

        Ok(BlockOutcome {
            value: last,
            returned: false,
            cleared,
        })
    }

    async fn exec_step(
        &self,
        step: &Step,
        interp: &Interpreter,
        in_handler: bool,
        active_error: Option<&RuntimeError>,
    ) -> RuntimeResult<StepResult> {
        match &step.kind {
            StepKind::Set { targets, value } => {
                let value = self.eval(value, interp).await?;
                self.assign_all(targets, value.clone(), interp).await?;
                Ok(StepResult::proceed(value))
            }
            StepKind::Call(expr) | StepKind::Expression(expr) => {
                Ok(StepResult::proceed(self.eval(expr, interp).await?))
            }
            StepKind::Return(values) => {
                if in_handler {
                    return Err(RuntimeError::new(
                        ErrorCode::ReturnViolation,
                        "return is not allowed inside on_error",
                    ));
                }
                let mut evaluated = Vec::with_capacity(values.len());
                for value in values {
                    evaluated.push(self.eval(value, interp).await?);
                }
                let value = match evaluated.len() {
                    0 => Value::Nil,
                    1 => evaluated.remove(0),
                    _ => Value::List(evaluated),
                };
                Ok(StepResult {
                    value,
                    signal: Signal::Return,
                })
            }
            StepKind::Emit(expr) => {
                let value = self.eval(expr, interp).await?;
                match &interp.host().emit {
                    Some(emit) => emit(value.clone()),
                    None => info!(output = %value, "emit (no host callback)"),
                }
                Ok(StepResult::proceed(value))
            }
            StepKind::Whisper { handle, data } => {
                let handle = self.eval(handle, interp).await?;
                let data = self.eval(data, interp).await?;
                match &interp.host().whisper {
                    Some(whisper) => whisper(handle, data.clone()),
                    None => info!(handle = %handle, data = %data, "whisper (no host callback)"),
                }
                Ok(StepResult::proceed(data))
            }
            StepKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let branch = if self.eval(condition, interp).await?.is_truthy() {
                    Some(then_block)
                } else {
                    else_block.as_ref()
                };
                match branch {
                    Some(block) => {
                        let outcome = self
                            .run(block, interp, in_handler, active_error.cloned())
                            .await?;
                        Ok(StepResult::from_block(outcome))
                    }
                    None => Ok(StepResult::proceed(Value::Nil)),
                }
            }
            StepKind::While { condition, body } => {
                let mut iterations = 0usize;
                let mut cleared = false;
                while self.eval(condition, interp).await?.is_truthy() {
                    iterations += 1;
                    self.check_iterations(iterations, interp)?;
                    match self.run_loop_body(body, interp, in_handler, active_error).await? {
                        LoopFlow::Return(value) => return Ok(returned(value)),
                        LoopFlow::Break => break,
                        LoopFlow::Next { cleared: c } => cleared |= c,
                    }
                }
                Ok(loop_result(cleared))
            }
            StepKind::ForEach {
                variable,
                collection,
                body,
            } => {
                let items = iteration_items(self.eval(collection, interp).await?)?;
                let mut cleared = false;
                for (i, item) in items.into_iter().enumerate() {
                    self.check_iterations(i + 1, interp)?;
                    interp.set_variable(variable, item).await?;
                    match self.run_loop_body(body, interp, in_handler, active_error).await? {
                        LoopFlow::Return(value) => return Ok(returned(value)),
                        LoopFlow::Break => break,
                        LoopFlow::Next { cleared: c } => cleared |= c,
                    }
                }
                Ok(loop_result(cleared))
            }
            StepKind::Must(expr) => match self.eval(expr, interp).await {
                Ok(value) if value.is_truthy() => Ok(StepResult::proceed(value)),
                Ok(value) => Err(RuntimeError::new(
                    ErrorCode::MustFailed,
                    format!("must condition evaluated to {}", value),
                )),
                Err(err) if err.is_control() => Err(err),
                Err(err) => Err(RuntimeError::new(
                    ErrorCode::MustFailed,
                    format!("must condition failed: {}", err.message),
                )
                .with_cause(err)),
            },
            StepKind::MustBe { check, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, interp).await?);
                }
                match interp.call(check, values).await {
                    Ok(value) if value.is_truthy() => Ok(StepResult::proceed(value)),
                    Ok(value) => Err(RuntimeError::new(
                        ErrorCode::MustFailed,
                        format!("mustbe {} returned {}", check, value),
                    )),
                    Err(err) => Err(RuntimeError::new(
                        ErrorCode::MustFailed,
                        format!("mustbe {} failed: {}", check, err.message),
                    )
                    .with_cause(err)),
                }
            }
            StepKind::Fail(message) => match (message, active_error) {
                (Some(expr), _) => {
                    let message = self.eval(expr, interp).await?;
                    Err(RuntimeError::new(ErrorCode::FailStatement, message.to_string()))
                }
                // bare `fail` inside a handler re-raises
                (None, Some(active)) => Err(active.clone()),
                (None, None) => Err(RuntimeError::new(ErrorCode::FailStatement, "fail")),
            },
            // hoisted when the body was loaded
            StepKind::OnError(_) => Ok(StepResult::proceed(Value::Nil)),
            StepKind::ClearError => {
                if !in_handler {
                    return Err(RuntimeError::new(
                        ErrorCode::ClearViolation,
                        "clear_error is only allowed inside on_error",
                    ));
                }
                Ok(StepResult {
                    value: Value::Nil,
                    signal: Signal::Cleared,
                })
            }
            StepKind::Ask {
                agent_model,
                prompt,
                into,
            } => {
                let agent_model = self.eval(agent_model, interp).await?;
                let prompt = self.eval(prompt, interp).await?;
                let output =
                    crate::ask::ask(interp, &agent_model, &prompt, step.position).await?;
                if let Some(target) = into {
                    self.assign(target, output.clone(), interp).await?;
                }
                Ok(StepResult::proceed(output))
            }
            StepKind::PromptUser { prompt, into } => {
                let message = self.eval(prompt, interp).await?;
                let prompter = interp.host().prompter.clone().ok_or_else(|| {
                    RuntimeError::internal("promptuser requires a host prompter")
                })?;
                let answer = prompter.prompt(&message.to_string()).await?;
                self.assign(into, answer.clone(), interp).await?;
                Ok(StepResult::proceed(answer))
            }
            StepKind::Break => Err(RuntimeError::break_signal()),
            StepKind::Continue => Err(RuntimeError::continue_signal()),
        }
    }

    async fn eval(&self, expr: &Expression, interp: &Interpreter) -> RuntimeResult<Value> {
        self.expression_evaluator.eval_expression(expr, interp).await
    }

    fn check_iterations(&self, iterations: usize, interp: &Interpreter) -> RuntimeResult<()> {
        let limit = interp.config().max_loop_iterations;
        if iterations > limit {
            return Err(RuntimeError::new(
                ErrorCode::ResourceExhaustion,
                format!("loop exceeded {} iterations", limit),
            ));
        }
        Ok(())
    }

    async fn run_loop_body(
        &self,
        body: &[Step],
        interp: &Interpreter,
        in_handler: bool,
        active_error: Option<&RuntimeError>,
    ) -> RuntimeResult<LoopFlow> {
        match self
            .run(body, interp, in_handler, active_error.cloned())
            .await
        {
            Ok(outcome) if outcome.returned => Ok(LoopFlow::Return(outcome.value)),
            Ok(outcome) => Ok(LoopFlow::Next {
                cleared: outcome.cleared,
            }),
            Err(err) if err.code == ErrorCode::Break => Ok(LoopFlow::Break),
            Err(err) if err.code == ErrorCode::Continue => Ok(LoopFlow::Next { cleared: false }),
            Err(err) => Err(err),
        }
    }

    async fn assign_all(
        &self,
        targets: &[LValue],
        value: Value,
        interp: &Interpreter,
    ) -> RuntimeResult<()> {
        if targets.len() == 1 {
            return self.assign(&targets[0], value, interp).await;
        }
        match value {
            Value::List(values) if values.len() == targets.len() => {
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value, interp).await?;
                }
                Ok(())
            }
            other => Err(RuntimeError::new(
                ErrorCode::ArgMismatch,
                format!(
                    "cannot assign {} to {} targets",
                    describe_len(&other),
                    targets.len()
                ),
            )),
        }
    }

    async fn assign(&self, target: &LValue, value: Value, interp: &Interpreter) -> RuntimeResult<()> {
        match target {
            LValue::Variable(name) => interp.set_variable(name, value).await,
            LValue::Element { variable, key } => {
                let key = self.eval(key, interp).await?;
                let mut container = interp.get_variable(variable).await?;
                match &mut container {
                    Value::List(items) => {
                        let index = list_index(items.len(), &key)?;
                        items[index] = value;
                    }
                    Value::Map(map) => {
                        let key = key.as_str().ok_or_else(|| {
                            RuntimeError::type_error(format!(
                                "map key must be a string, got {}",
                                key.type_name()
                            ))
                        })?;
                        map.insert(key.to_string(), value);
                    }
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "cannot assign an element of {}",
                            other.type_name()
                        )))
                    }
                }
                interp.set_variable(variable, container).await
            }
        }
    }
}

enum LoopFlow {
    Return(Value),
    Break,
    Next { cleared: bool },
}

fn returned(value: Value) -> StepResult {
    StepResult {
        value,
        signal: Signal::Return,
    }
}

fn loop_result(cleared: bool) -> StepResult {
    StepResult {
        value: Value::Nil,
        signal: if cleared {
            Signal::Cleared
        } else {
            Signal::Proceed
        },
    }
}

fn describe_len(value: &Value) -> String {
    match value {
        Value::List(items) => format!("{} values", items.len()),
        other => format!("a single {}", other.type_name()),
    }
}

/// Items visited by `for each`. Map order is unspecified.
fn iteration_items(collection: Value) -> RuntimeResult<Vec<Value>> {
    match collection {
        Value::Nil => Ok(vec![]),
        Value::List(items) => Ok(items),
        Value::Map(map) => Ok(map.into_values().collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(RuntimeError::type_error(format!(
            "cannot iterate over {}",
            other.type_name()
        ))),
    }
}
