use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::eval::context::Interpreter;
use crate::eval::value::Value;
use crate::policy::Capability;
use crate::store::AgentModelReader;

use super::{Tool, ToolSpec};

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(EmitEvent),
        Arc::new(Len),
        Arc::new(TypeOf),
        Arc::new(NotEmpty),
        Arc::new(ListAgentModels),
    ];
    for type_name in ["string", "number", "bool", "list", "map"] {
        tools.push(Arc::new(IsType { type_name }));
    }
    tools
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RuntimeResult<()> {
    if args.len() < min || args.len() > max {
        return Err(RuntimeError::new(
            ErrorCode::ArgMismatch,
            format!("{} takes {}..={} arguments, got {}", name, min, max, args.len()),
        ));
    }
    Ok(())
}

/// `emit_event(name, [source], [payload])`: dispatches from the calling fork
/// and returns the number of handlers started.
struct EmitEvent;

#[async_trait]
impl Tool for EmitEvent {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("emit_event", "raise an event").requires(Capability::event_emit())
    }

    async fn call(&self, interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity("emit_event", &args, 1, 3)?;
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(Value::String(name)) => name,
            other => {
                return Err(RuntimeError::type_error(format!(
                    "event name must be a string, got {}",
                    other.unwrap_or_default().type_name()
                )))
            }
        };
        let source = match args.next() {
            Some(Value::String(source)) => source,
            Some(Value::Nil) | None => "script".to_string(),
            Some(other) => other.to_string(),
        };
        let payload = args.next().unwrap_or_default();
        let dispatch = interp
            .services()
            .events
            .emit(interp, &name, &source, payload)
            .await;
        Ok(Value::from(dispatch.handler_count() as i64))
    }
}

struct Len;

#[async_trait]
impl Tool for Len {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("len", "length of a string, list or map")
    }

    async fn call(&self, _interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity("len", &args, 1, 1)?;
        let len = match &args[0] {
            Value::String(s) => s.chars().count(),
            Value::List(l) => l.len(),
            Value::Map(m) => m.len(),
            Value::Nil => 0,
            other => {
                return Err(RuntimeError::type_error(format!(
                    "len is not defined for {}",
                    other.type_name()
                )))
            }
        };
        Ok(Value::from(len as i64))
    }
}

struct TypeOf;

#[async_trait]
impl Tool for TypeOf {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("type_of", "type name of a value")
    }

    async fn call(&self, _interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity("type_of", &args, 1, 1)?;
        Ok(Value::from(args[0].type_name()))
    }
}

/// `is_<type>(v)` checks, mostly for `mustbe`.
struct IsType {
    type_name: &'static str,
}

#[async_trait]
impl Tool for IsType {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            format!("is_{}", self.type_name),
            format!("whether the value is a {}", self.type_name),
        )
    }

    async fn call(&self, _interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity(&format!("is_{}", self.type_name), &args, 1, 1)?;
        Ok(Value::from(args[0].type_name() == self.type_name))
    }
}

struct NotEmpty;

#[async_trait]
impl Tool for NotEmpty {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("not_empty", "whether the value is truthy")
    }

    async fn call(&self, _interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity("not_empty", &args, 1, 1)?;
        Ok(Value::from(args[0].is_truthy()))
    }
}

/// `agentmodel.list()`: read-only listing of agent models.
struct ListAgentModels;

#[async_trait]
impl Tool for ListAgentModels {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("agentmodel.list", "list registered agent models")
            .requires(Capability::model_read())
    }

    async fn call(&self, interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value> {
        arity("agentmodel.list", &args, 0, 0)?;
        let reader = AgentModelReader::new(interp.services().agent_models.clone());
        let models = reader.list().await?;
        Ok(Value::List(models.iter().map(|m| m.to_value()).collect()))
    }
}
