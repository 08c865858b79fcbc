use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::provider::llm::AIProvider;
use crate::provider::types::{
    ChatRequest, ChatResponse, ProviderContext, ProviderError, ProviderResult, ResponseMetadata,
};

type Pattern = String;

type Answer = String;

type KnowledgeBase = DashMap<Pattern, Answer>;

/// Deterministic provider answering from a pattern -> answer table. The
/// longest pattern contained in the prompt wins.
#[derive(Clone, Default)]
pub struct SimpleExpertProvider {
    name: String,
    knowledge_base: Arc<KnowledgeBase>,
}

impl SimpleExpertProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            knowledge_base: Arc::new(DashMap::new()),
        }
    }

    pub fn with_answer(self, pattern: impl Into<String>, answer: impl Into<String>) -> Self {
        self.knowledge_base.insert(pattern.into(), answer.into());
        self
    }

    fn lookup(&self, prompt: &str) -> Option<Answer> {
        self.knowledge_base
            .iter()
            .filter(|entry| prompt.contains(entry.key().as_str()))
            .max_by_key(|entry| entry.key().len())
            .map(|entry| entry.value().clone())
    }
}

impl From<serde_json::Value> for SimpleExpertProvider {
    fn from(config: serde_json::Value) -> Self {
        let provider = SimpleExpertProvider::new(
            config
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("simple_expert"),
        );
        if let Some(answers) = config.get("answers").and_then(|a| a.as_object()) {
            for (pattern, answer) in answers {
                match answer.as_str() {
                    Some(answer) => {
                        provider
                            .knowledge_base
                            .insert(pattern.clone(), answer.to_string());
                    }
                    None => tracing::warn!("Invalid value for key: {}", pattern),
                }
            }
        }
        provider
    }
}

#[async_trait]
impl AIProvider for SimpleExpertProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        context: &ProviderContext,
        request: &ChatRequest,
    ) -> ProviderResult<ChatResponse> {
        let answer = self
            .lookup(&request.prompt)
            .ok_or_else(|| ProviderError::ApiError("No response found".to_string()))?;
        debug!(turn = context.turn, "response: {:?}", answer);
        Ok(ChatResponse {
            text_content: answer,
            metadata: ResponseMetadata {
                model: request.model_name.clone(),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            },
        })
    }
}
