//! Tools callable from scripts.
//!
//! Every invocation is checked against the execution policy before the tool
//! runs. Tools receive the calling fork, so anything they do happens in the
//! caller's sandbox.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::eval::context::Interpreter;
use crate::eval::value::Value;
use crate::policy::Capability;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub required_capabilities: Vec<Capability>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_capabilities: vec![],
        }
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.required_capabilities.push(capability);
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, interp: &Interpreter, args: Vec<Value>) -> RuntimeResult<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`builtin::builtin_tools`].
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for tool in builtin::builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Registers `tool` under its spec name, replacing any previous tool.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[tracing::instrument(skip(self, interp, args), level = "debug")]
    pub async fn invoke(
        &self,
        name: &str,
        interp: &Interpreter,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let tool = self
            .tools
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| {
                RuntimeError::new(ErrorCode::ToolNotFound, format!("tool '{}' not found", name))
            })?;

        let policy = &interp.services().policy;
        for capability in tool.spec().required_capabilities {
            policy.check(&capability).map_err(|err| {
                RuntimeError::new(
                    ErrorCode::Policy,
                    format!("tool '{}' requires {}", name, capability),
                )
                .with_cause(err)
            })?;
        }
        tool.call(interp, args).await
    }
}
