//! Callbacks the embedding host hands to the engine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{RuntimeError, RuntimeResult};
use crate::eval::value::Value;

pub type EmitFunc = Arc<dyn Fn(Value) + Send + Sync>;
pub type WhisperFunc = Arc<dyn Fn(Value, Value) + Send + Sync>;
/// Receives `(event_name, source, error)` for every failed event handler.
pub type EventErrorFunc = Arc<dyn Fn(&str, &str, &RuntimeError) + Send + Sync>;

/// Interactive prompt collaborator behind `promptuser`.
#[async_trait]
pub trait UserPrompter: Send + Sync {
    async fn prompt(&self, message: &str) -> RuntimeResult<Value>;
}

#[derive(Clone, Default)]
pub struct HostContext {
    pub emit: Option<EmitFunc>,
    pub whisper: Option<WhisperFunc>,
    pub on_event_error: Option<EventErrorFunc>,
    pub prompter: Option<Arc<dyn UserPrompter>>,
    /// Caller deadline forwarded to providers. The engine itself never times out.
    pub deadline: Option<Instant>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_emit(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.emit = Some(Arc::new(f));
        self
    }

    pub fn with_whisper(mut self, f: impl Fn(Value, Value) + Send + Sync + 'static) -> Self {
        self.whisper = Some(Arc::new(f));
        self
    }

    pub fn with_event_error(
        mut self,
        f: impl Fn(&str, &str, &RuntimeError) + Send + Sync + 'static,
    ) -> Self {
        self.on_event_error = Some(Arc::new(f));
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn UserPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("emit", &self.emit.is_some())
            .field("whisper", &self.whisper.is_some())
            .field("on_event_error", &self.on_event_error.is_some())
            .field("prompter", &self.prompter.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}
