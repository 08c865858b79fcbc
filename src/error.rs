use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eval::value::Value;

/// Source location of a step or expression. `0:0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0 && self.column == 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Stable error codes. The discriminant doubles as the numeric status
/// reported by command execution.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[repr(i32)]
pub enum ErrorCode {
    Internal = 1,
    Duplicate = 2,
    KeyNotFound = 3,
    ProcNotFound = 4,
    Policy = 5,
    ToolNotFound = 6,
    ResourceExhaustion = 7,
    Type = 8,
    WriteViolation = 9,
    ReturnViolation = 10,
    FailStatement = 11,
    External = 12,
    UnknownKeyword = 13,
    MustFailed = 14,
    ClearViolation = 15,
    ArgMismatch = 16,
    Parse = 17,
    DivisionByZero = 18,
    // 制御用 (loops only, never shown to users)
    Break = 100,
    Continue = 101,
}

impl ErrorCode {
    pub fn status(self) -> i32 {
        self as i32
    }

    pub fn is_control(self) -> bool {
        matches!(self, ErrorCode::Break | ErrorCode::Continue)
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// The single error type flowing through the execution engine.
///
/// Errors are values: they are cloned into handler variables, carried across
/// task boundaries for event dispatch, and compared by code in tests. The
/// optional cause keeps the native error of a collaborator (provider, store,
/// policy gate) reachable through [`std::error::Error::source`].
#[derive(Clone, Error)]
#[error("[{code}] {message}{}", describe_context(.position, .cause))]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub message: String,
    pub position: Option<Position>,
    #[source]
    cause: Option<Cause>,
    // set once a frame handler has seen the error, reset at procedure boundaries
    pub(crate) handled: bool,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
            cause: None,
            handled: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Type, message)
    }

    pub fn key_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyNotFound, message)
    }

    pub fn break_signal() -> Self {
        Self::new(ErrorCode::Break, "break")
    }

    pub fn continue_signal() -> Self {
        Self::new(ErrorCode::Continue, "continue")
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Stamps `position` only when the error does not carry one yet.
    pub fn at_if_unknown(mut self, position: Position) -> Self {
        if self.position.map_or(true, |p| p.is_unknown()) && !position.is_unknown() {
            self.position = Some(position);
        }
        self
    }

    pub fn is_control(&self) -> bool {
        self.code.is_control()
    }

    pub fn status(&self) -> i32 {
        self.code.status()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub(crate) fn mark_handled(mut self) -> Self {
        self.handled = true;
        self
    }

    /// Converts an error leaving a procedure, event handler or command block
    /// into what the caller is allowed to see. Loop sentinels cannot cross
    /// a frame boundary.
    pub(crate) fn into_caller_error(mut self) -> Self {
        if self.is_control() {
            let keyword = if self.code == ErrorCode::Break {
                "break"
            } else {
                "continue"
            };
            let position = self.position;
            self = RuntimeError::internal(format!("'{}' used outside of a loop", keyword));
            self.position = position;
        }
        self.handled = false;
        self
    }

    /// Script-visible representation bound into the error variable of an
    /// `on_error` block.
    pub fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        map.insert("code".to_string(), Value::Number(self.status() as f64));
        let kind: &'static str = self.code.into();
        map.insert("kind".to_string(), Value::String(kind.to_string()));
        map.insert("message".to_string(), Value::String(self.message.clone()));
        let position = self.position.unwrap_or_default();
        map.insert("line".to_string(), Value::Number(position.line as f64));
        map.insert("column".to_string(), Value::Number(position.column as f64));
        Value::Map(map)
    }
}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("position", &self.position)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

fn describe_context(position: &Option<Position>, cause: &Option<Cause>) -> String {
    let mut tail = String::new();
    if let Some(position) = position.filter(|p| !p.is_unknown()) {
        tail.push_str(&format!(" (at {})", position));
    }
    if let Some(cause) = cause {
        tail.push_str(&format!(": {}", cause));
    }
    tail
}
