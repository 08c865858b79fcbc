//! Builder interface turning script text into steps.
//!
//! The real grammar is owned by the host. The engine needs it in one place:
//! an agent reply carries an actions section that must become steps before
//! it can run. [`JsonScriptParser`] accepts serialized steps and is the
//! default when no grammar is plugged in.

use thiserror::Error;

use crate::ast::Step;
use crate::error::{ErrorCode, RuntimeError};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid script: {0}")]
    Syntax(String),
    #[error("invalid script json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ParseError> for RuntimeError {
    fn from(err: ParseError) -> Self {
        RuntimeError::new(ErrorCode::Parse, "script could not be parsed").with_cause(err)
    }
}

pub trait ScriptParser: Send + Sync {
    fn parse_commands(&self, source: &str) -> Result<Vec<Step>, ParseError>;
}

#[derive(Debug, Default, Clone)]
pub struct JsonScriptParser;

impl ScriptParser for JsonScriptParser {
    fn parse_commands(&self, source: &str) -> Result<Vec<Step>, ParseError> {
        let source = source.trim();
        if source.is_empty() {
            return Ok(vec![]);
        }
        if !source.starts_with('[') {
            return Err(ParseError::Syntax(
                "expected a JSON array of steps".to_string(),
            ));
        }
        Ok(serde_json::from_str(source)?)
    }
}
