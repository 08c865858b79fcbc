//! AI provider backends consumed by `ask`.

pub mod llm;
pub mod llms;
pub mod provider_registry;
pub mod types;

pub use llm::AIProvider;
pub use provider_registry::ProviderRegistry;
pub use types::{
    ChatRequest, ChatResponse, ProviderContext, ProviderError, ProviderResult, ResponseMetadata,
};
