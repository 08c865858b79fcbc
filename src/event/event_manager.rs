use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::ast::EventDecl;
use crate::error::{ErrorCode, Position, RuntimeError, RuntimeResult};
use crate::eval::context::Interpreter;
use crate::eval::expression::ExpressionEvaluator;
use crate::eval::procedure::{hoist_error_handler, Block};
use crate::eval::statement::StepExecutor;
use crate::eval::value::Value;
use crate::host::HostContext;

const NAME_KEY: &str = "name";
const SOURCE_KEY: &str = "source";
const PAYLOAD_KEY: &str = "payload";

/// A registered handler, keyed by the event name it was registered under.
#[derive(Debug, Clone)]
pub struct EventHandler {
    pub event_name: String,
    pub handler_name: Option<String>,
    pub payload_variable: Option<String>,
    pub body: Block,
    pub error_handler: Option<Block>,
    pub position: Position,
}

#[derive(Debug, Default)]
pub struct EventManager {
    handlers: RwLock<HashMap<String, Vec<Arc<EventHandler>>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates the declaration's name expression (once) and hoists its
    /// error handler, without touching the registry.
    pub async fn prepare(&self, decl: &EventDecl, interp: &Interpreter) -> RuntimeResult<EventHandler> {
        let event_name = match ExpressionEvaluator::new()
            .eval_expression(&decl.name, interp)
            .await
            .map_err(|e| e.at_if_unknown(decl.position))?
        {
            Value::String(name) => name,
            other => {
                return Err(RuntimeError::type_error(format!(
                    "event name must evaluate to a string, got {}",
                    other.type_name()
                ))
                .with_position(decl.position))
            }
        };

        if let (Some(handler_name), Some(symbols)) = (&decl.handler_name, &interp.services().symbols) {
            if symbols.event_handler_names().contains(handler_name) {
                return Err(RuntimeError::new(
                    ErrorCode::Duplicate,
                    format!("event handler '{}' is already provided by the host", handler_name),
                )
                .with_position(decl.position));
            }
        }

        let (body, error_handler) = hoist_error_handler(decl.body.clone())?;
        Ok(EventHandler {
            event_name,
            handler_name: decl.handler_name.clone(),
            payload_variable: decl.payload_variable.clone(),
            body,
            error_handler,
            position: decl.position,
        })
    }

    pub async fn register(&self, handler: EventHandler) -> RuntimeResult<()> {
        let mut registration = self.registration().await;
        registration.ensure_available(std::slice::from_ref(&handler))?;
        registration.insert(handler);
        Ok(())
    }

    /// Holds the registry for writing until the returned guard is dropped,
    /// so a caller can check a batch of handlers before committing any of
    /// them.
    pub(crate) async fn registration(&self) -> HandlerRegistration<'_> {
        HandlerRegistration {
            handlers: self.handlers.write().await,
        }
    }

    pub async fn register_decl(&self, decl: &EventDecl, interp: &Interpreter) -> RuntimeResult<()> {
        let handler = self.prepare(decl, interp).await?;
        self.register(handler).await
    }

    pub async fn handler_count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_name)
            .map_or(0, |h| h.len())
    }

    /// Dispatches `event_name` to every registered handler.
    ///
    /// # Panics
    ///
    /// When handlers exist but the host did not install both the emit and
    /// whisper callbacks. That is a host wiring bug, not a script error.
    #[tracing::instrument(skip(self, interp, payload), level = "debug")]
    pub async fn emit(
        &self,
        interp: &Interpreter,
        event_name: &str,
        source: &str,
        payload: Value,
    ) -> EventDispatch {
        let handlers = self
            .handlers
            .read()
            .await
            .get(event_name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            warn!(event = event_name, source, "no handler registered, event ignored");
            return EventDispatch::default();
        }

        let host = interp.services().host.clone();
        if host.emit.is_none() || host.whisper.is_none() {
            panic!(
                "host misconfiguration: event '{}' has handlers but the emit/whisper callbacks are not set",
                event_name
            );
        }

        let event = canonical_event(event_name, source, payload);
        let frame = format!("event:{}", event_name);
        let mut handles = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let reporter = ErrorReporter {
                host: host.clone(),
                event_name: event_name.to_string(),
                source: source.to_string(),
            };
            match interp.fork(&frame, handler.error_handler.clone()).await {
                Ok(fork) => handles.push(spawn_handler(fork, handler, event.clone(), reporter)),
                Err(err) => reporter.report(&err.with_position(handler.position)),
            }
        }
        debug!(event = event_name, handlers = handles.len(), "event dispatched");
        EventDispatch { handles }
    }
}

pub(crate) struct HandlerRegistration<'a> {
    handlers: RwLockWriteGuard<'a, HashMap<String, Vec<Arc<EventHandler>>>>,
}

impl HandlerRegistration<'_> {
    /// Fails with `Duplicate` when any named handler in `batch` is already
    /// registered.
    pub(crate) fn ensure_available(&self, batch: &[EventHandler]) -> RuntimeResult<()> {
        for handler in batch {
            let Some(name) = &handler.handler_name else {
                continue;
            };
            let taken = self
                .handlers
                .values()
                .flatten()
                .any(|h| h.handler_name.as_ref() == Some(name));
            if taken {
                return Err(RuntimeError::new(
                    ErrorCode::Duplicate,
                    format!("event handler '{}' is already registered", name),
                )
                .with_position(handler.position));
            }
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }

    pub(crate) fn insert(&mut self, handler: EventHandler) {
        debug!(event = %handler.event_name, handler = ?handler.handler_name, "event handler registered");
        self.handlers
            .entry(handler.event_name.clone())
            .or_default()
            .push(Arc::new(handler));
    }
}

fn spawn_handler(
    fork: Interpreter,
    handler: Arc<EventHandler>,
    event: Value,
    reporter: ErrorReporter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let task = tokio::spawn(async move {
            if let Some(variable) = &handler.payload_variable {
                fork.bind_local(variable, event);
            }
            StepExecutor::new()
                .run(&handler.body, &fork, false, None)
                .await
                .map(|_| ())
                .map_err(RuntimeError::into_caller_error)
        });

        let result = match task.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(panic_error(join_error.into_panic()))
            }
            Err(join_error) => Err(RuntimeError::internal(format!(
                "event handler task did not complete: {}",
                join_error
            ))),
        };
        if let Err(err) = result {
            reporter.report(&err);
        }
    })
}

fn panic_error(payload: Box<dyn Any + Send>) -> RuntimeError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    RuntimeError::internal(format!("event handler panicked: {}", message))
}

struct ErrorReporter {
    host: Arc<HostContext>,
    event_name: String,
    source: String,
}

impl ErrorReporter {
    fn report(&self, err: &RuntimeError) {
        match &self.host.on_event_error {
            Some(callback) => callback(&self.event_name, &self.source, err),
            None => error!(
                event = %self.event_name,
                source = %self.source,
                error = %err,
                "event handler failed"
            ),
        }
    }
}

/// Handle on the tasks started by one emission.
#[derive(Debug, Default)]
pub struct EventDispatch {
    handles: Vec<JoinHandle<()>>,
}

impl EventDispatch {
    pub fn handler_count(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every handler task, including its error reporting.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(join_error) = result {
                error!(error = %join_error, "event supervisor task failed");
            }
        }
    }
}

/// Whether `value` already has the canonical event shape: a map with
/// exactly `name` (string), `source` (string) and `payload`.
pub fn is_canonical_event(value: &Value) -> bool {
    match value {
        Value::Map(map) => {
            map.len() == 3
                && matches!(map.get(NAME_KEY), Some(Value::String(_)))
                && matches!(map.get(SOURCE_KEY), Some(Value::String(_)))
                && map.contains_key(PAYLOAD_KEY)
        }
        _ => false,
    }
}

pub fn canonical_event(event_name: &str, source: &str, payload: Value) -> Value {
    if is_canonical_event(&payload) {
        return payload;
    }
    Value::map([
        (NAME_KEY, Value::from(event_name)),
        (SOURCE_KEY, Value::from(source)),
        (PAYLOAD_KEY, payload),
    ])
}
