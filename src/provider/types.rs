use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::{ErrorCode, RuntimeError};

/// Per-call context handed to a provider.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Correlates every turn of one `ask`.
    pub trace_id: String,
    pub turn: usize,
    /// Caller deadline. Providers honour it; the engine never enforces it.
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model_name: String,
    pub prompt: String,
    pub api_key: SecretString,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct ChatResponse {
    pub text_content: String,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text_content: content.into(),
            metadata: ResponseMetadata::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub token_usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    pub extra: HashMap<String, String>,
}

impl Default for ResponseMetadata {
    fn default() -> Self {
        Self {
            model: String::new(),
            created_at: Utc::now(),
            token_usage: None,
            finish_reason: None,
            extra: HashMap::new(),
        }
    }
}

/// (prompt tokens, completion tokens)
pub type TokenUsage = (usize, usize);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error("Provider already registered: {0}")]
    AlreadyRegistered(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<ProviderError> for RuntimeError {
    fn from(err: ProviderError) -> Self {
        RuntimeError::new(ErrorCode::External, "provider call failed").with_cause(err)
    }
}
