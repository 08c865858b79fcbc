use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::llm::AIProvider;
use super::types::{ProviderError, ProviderResult};

/// Registered providers, looked up by name. Agent models name their
/// provider; an empty name falls back to the primary provider.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn AIProvider>>,
    primary_provider: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(level = "debug", skip(self, provider))]
    pub async fn register_provider(
        &self,
        name: &str,
        provider: Arc<dyn AIProvider>,
    ) -> ProviderResult<()> {
        if self.providers.contains_key(name) {
            return Err(ProviderError::AlreadyRegistered(name.to_string()));
        }
        self.providers.insert(name.to_string(), provider);

        let mut primary = self.primary_provider.write().await;
        if primary.is_none() {
            debug!(provider = name, "primary provider set");
            *primary = Some(name.to_string());
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn set_primary_provider(&self, name: &str) -> ProviderResult<()> {
        if !self.providers.contains_key(name) {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        *self.primary_provider.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn primary_provider(&self) -> Option<String> {
        self.primary_provider.read().await.clone()
    }

    pub async fn get_provider(&self, name: &str) -> ProviderResult<Arc<dyn AIProvider>> {
        let name = if name.is_empty() {
            self.primary_provider()
                .await
                .ok_or_else(|| ProviderError::NotFound("<primary>".to_string()))?
        } else {
            name.to_string()
        };
        self.providers
            .get(&name)
            .map(|p| p.value().clone())
            .ok_or(ProviderError::NotFound(name))
    }

    pub async fn unregister_provider(&self, name: &str) -> ProviderResult<()> {
        self.providers
            .remove(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        let mut primary = self.primary_provider.write().await;
        if primary.as_deref() == Some(name) {
            *primary = None;
        }
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
