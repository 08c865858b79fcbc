//! Entry points of a root [`Interpreter`]: loading programs, running
//! procedures and command blocks, and raising events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::ast::{Program, Step};
use crate::error::{ErrorCode, Position, RuntimeError, RuntimeResult};
use crate::eval::context::Interpreter;
use crate::eval::procedure::{Commands, Procedure};
use crate::eval::statement::StepExecutor;
use crate::eval::value::Value;
use crate::event::{EventDispatch, EventHandler};

/// Prefix that routes a call straight to the tool registry.
pub const TOOL_PREFIX: &str = "tool.";

/// Result of a command execution. `status` is 0 on success and the error's
/// code otherwise.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: i32,
    pub value: Value,
    pub error: Option<RuntimeError>,
}

impl ExecutionOutcome {
    fn ok(value: Value) -> Self {
        Self {
            status: 0,
            value,
            error: None,
        }
    }

    fn failed(error: RuntimeError) -> Self {
        Self {
            status: error.status(),
            value: Value::Nil,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn into_result(self) -> RuntimeResult<Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value),
        }
    }
}

struct PreparedProgram {
    procedures: Vec<Arc<Procedure>>,
    commands: Vec<Arc<Commands>>,
    handlers: Vec<EventHandler>,
}

impl Interpreter {
    /// Replaces the loaded program: procedures, command blocks and event
    /// handlers. Nothing changes when the program is rejected.
    #[tracing::instrument(skip(self, program), level = "debug")]
    pub async fn load(&self, program: Program) -> RuntimeResult<()> {
        self.ensure_root("load")?;
        let prepared = self.prepare_program(program).await?;

        let table: HashMap<String, Arc<Procedure>> = prepared
            .procedures
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        let procedure_count = table.len();
        self.root().replace_procedures(table).await;
        self.root().replace_commands(prepared.commands).await;

        let mut registration = self.services().events.registration().await;
        registration.clear();
        let handler_count = prepared.handlers.len();
        for handler in prepared.handlers {
            registration.insert(handler);
        }
        info!(procedures = procedure_count, handlers = handler_count, "program loaded");
        Ok(())
    }

    /// Merges `program` into the loaded one. Redefining an existing
    /// procedure is a `Duplicate` error unless the engine allows it.
    #[tracing::instrument(skip(self, program), level = "debug")]
    pub async fn append(&self, program: Program) -> RuntimeResult<()> {
        self.ensure_root("append")?;
        let prepared = self.prepare_program(program).await?;

        // ハンドラ名の衝突を先に確認してから何かを書き換える
        let mut registration = self.services().events.registration().await;
        registration.ensure_available(&prepared.handlers)?;

        let procedure_count = prepared.procedures.len();
        self.root()
            .insert_procedures(prepared.procedures, self.config().allow_redefinition)
            .await?;
        self.root().extend_commands(prepared.commands).await;
        for handler in prepared.handlers {
            registration.insert(handler);
        }
        info!(procedures = procedure_count, "program appended");
        Ok(())
    }

    async fn prepare_program(&self, program: Program) -> RuntimeResult<PreparedProgram> {
        let reserved: HashSet<String> = self
            .services()
            .symbols
            .as_ref()
            .map(|s| s.procedure_names().into_iter().collect())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut procedures = Vec::with_capacity(program.procedures.len());
        for def in program.procedures {
            if reserved.contains(&def.name) {
                return Err(duplicate(
                    format!("procedure '{}' is provided by the host", def.name),
                    def.position,
                ));
            }
            if !seen.insert(def.name.clone()) {
                return Err(duplicate(
                    format!("procedure '{}' is defined twice", def.name),
                    def.position,
                ));
            }
            procedures.push(Arc::new(Procedure::from_def(def)?));
        }

        let commands = program
            .commands
            .into_iter()
            .map(|block| Commands::from_block(block).map(Arc::new))
            .collect::<RuntimeResult<Vec<_>>>()?;

        let mut handler_names = HashSet::new();
        let mut handlers = Vec::with_capacity(program.events.len());
        for decl in &program.events {
            let handler = self.services().events.prepare(decl, self).await?;
            if let Some(name) = &handler.handler_name {
                if !handler_names.insert(name.clone()) {
                    return Err(duplicate(
                        format!("event handler '{}' is defined twice", name),
                        decl.position,
                    ));
                }
            }
            handlers.push(handler);
        }

        Ok(PreparedProgram {
            procedures,
            commands,
            handlers,
        })
    }

    /// Runs a procedure by name and returns its value.
    pub async fn run(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        self.call_procedure(name, args).await
    }

    /// Runs `steps` as a command block in a fresh fork.
    #[tracing::instrument(skip(self, steps), level = "debug")]
    pub async fn execute(&self, steps: Vec<Step>) -> ExecutionOutcome {
        match Commands::from_steps(steps) {
            Ok(commands) => self.execute_commands(&commands).await,
            Err(err) => ExecutionOutcome::failed(err),
        }
    }

    /// Runs the command blocks of the loaded program in order, stopping at
    /// the first failure.
    pub async fn execute_loaded(&self) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::ok(Value::Nil);
        for commands in self.root().commands().await {
            outcome = self.execute_commands(&commands).await;
            if !outcome.is_success() {
                break;
            }
        }
        outcome
    }

    async fn execute_commands(&self, commands: &Commands) -> ExecutionOutcome {
        let fork = match self.fork("commands", commands.error_handler.clone()).await {
            Ok(fork) => fork,
            Err(err) => return ExecutionOutcome::failed(err.at_if_unknown(commands.position)),
        };
        match StepExecutor::new()
            .run(&commands.body, &fork, false, None)
            .await
        {
            Ok(outcome) => ExecutionOutcome::ok(outcome.value),
            Err(err) => {
                let err = err.into_caller_error();
                debug!(status = err.status(), error = %err, "command block failed");
                ExecutionOutcome::failed(err)
            }
        }
    }

    /// Raises an event. Handlers run concurrently; the returned dispatch can
    /// be dropped or joined.
    pub async fn emit_event(&self, event_name: &str, source: &str, payload: Value) -> EventDispatch {
        self.services()
            .events
            .emit(self, event_name, source, payload)
            .await
    }

    /// Resolves a call expression: `tool.`-prefixed names go to the tool
    /// registry, anything else tries procedures first and tools second.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        if let Some(tool) = name.strip_prefix(TOOL_PREFIX) {
            return self.services().tools.invoke(tool, self, args).await;
        }
        if self.root().procedure(name).await.is_some() {
            return self.call_procedure(name, args).await;
        }
        if self.services().tools.contains(name) {
            return self.services().tools.invoke(name, self, args).await;
        }
        Err(RuntimeError::new(
            ErrorCode::ProcNotFound,
            format!("procedure '{}' not found", name),
        ))
    }

    #[tracing::instrument(skip(self, args), level = "debug")]
    pub async fn call_procedure(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let procedure = self.root().procedure(name).await.ok_or_else(|| {
            RuntimeError::new(
                ErrorCode::ProcNotFound,
                format!("procedure '{}' not found", name),
            )
        })?;

        let (min, max) = procedure.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{}..={}", min, max)
            };
            return Err(RuntimeError::new(
                ErrorCode::ArgMismatch,
                format!(
                    "procedure '{}' expects {} arguments, got {}",
                    name,
                    expected,
                    args.len()
                ),
            ));
        }

        let frame = self.fork(name, procedure.error_handler.clone()).await?;
        let mut args = args.into_iter();
        for param in procedure
            .required_params
            .iter()
            .chain(procedure.optional_params.iter())
        {
            frame.bind_local(param, args.next().unwrap_or_default());
        }

        let outcome = StepExecutor::new()
            .run(&procedure.body, &frame, false, None)
            .await
            .map_err(RuntimeError::into_caller_error)?;
        Ok(if outcome.returned {
            outcome.value
        } else {
            Value::Nil
        })
    }
}

fn duplicate(message: String, position: Position) -> RuntimeError {
    RuntimeError::new(ErrorCode::Duplicate, message).with_position(position)
}
