use std::collections::HashMap;

use crate::eval::value::Value;

/// Read-only symbols supplied by the host.
///
/// Constants are the last source consulted by variable lookup. Procedure
/// and event-handler names are reserved: scripts may not define their own
/// under the same name.
#[mockall::automock]
pub trait SymbolProvider: Send + Sync {
    fn constant(&self, name: &str) -> Option<Value>;
    fn procedure_names(&self) -> Vec<String>;
    fn event_handler_names(&self) -> Vec<String>;
}

#[derive(Debug, Default, Clone)]
pub struct StaticSymbols {
    constants: HashMap<String, Value>,
    procedures: Vec<String>,
    event_handlers: Vec<String>,
}

impl StaticSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn procedure(mut self, name: impl Into<String>) -> Self {
        self.procedures.push(name.into());
        self
    }

    pub fn event_handler(mut self, name: impl Into<String>) -> Self {
        self.event_handlers.push(name.into());
        self
    }
}

impl SymbolProvider for StaticSymbols {
    fn constant(&self, name: &str) -> Option<Value> {
        self.constants.get(name).cloned()
    }

    fn procedure_names(&self) -> Vec<String> {
        self.procedures.clone()
    }

    fn event_handler_names(&self) -> Vec<String> {
        self.event_handlers.clone()
    }
}
