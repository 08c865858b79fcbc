use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, ProviderContext, ProviderResult};

/// Backend able to answer one chat turn. The `ask` loop calls it once per
/// turn and blocks for the duration of the call.
#[async_trait]
pub trait AIProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, context: &ProviderContext, request: &ChatRequest)
        -> ProviderResult<ChatResponse>;
}
