use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::eval::value::Value;
use crate::policy::{Capability, PolicyGate};

use super::{StoreError, StoreResult};

const KIND: &str = "agent model";

/// Named binding of a provider model, as addressed by `ask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentModel {
    pub name: String,
    /// Provider name in the registry. Empty means the primary provider.
    #[serde(default)]
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub allow_loop: bool,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_turns() -> usize {
    5
}

impl AgentModel {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            account: None,
            allow_loop: false,
            max_turns: default_max_turns(),
            temperature: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn looping(mut self, max_turns: usize) -> Self {
        self.allow_loop = true;
        self.max_turns = max_turns;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Invalid {
                kind: KIND,
                reason: "name must not be empty".to_string(),
            });
        }
        if self.max_turns == 0 {
            return Err(StoreError::Invalid {
                kind: KIND,
                reason: "max_turns must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Script-visible description. Never includes credentials.
    pub fn to_value(&self) -> Value {
        Value::map([
            ("name", Value::from(self.name.as_str())),
            ("provider", Value::from(self.provider.as_str())),
            ("model", Value::from(self.model.as_str())),
            ("allow_loop", Value::from(self.allow_loop)),
            ("max_turns", Value::from(self.max_turns as i64)),
        ])
    }
}

#[async_trait]
pub trait AgentModelStore: Send + Sync {
    async fn register(&self, model: AgentModel) -> StoreResult<()>;
    async fn get(&self, name: &str) -> StoreResult<AgentModel>;
    async fn update(&self, model: AgentModel) -> StoreResult<()>;
    async fn delete(&self, name: &str) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<AgentModel>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAgentModelStore {
    models: DashMap<String, AgentModel>,
}

impl InMemoryAgentModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentModelStore for InMemoryAgentModelStore {
    async fn register(&self, model: AgentModel) -> StoreResult<()> {
        model.validate()?;
        match self.models.entry(model.name.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                kind: KIND,
                name: model.name,
            }),
            Entry::Vacant(entry) => {
                entry.insert(model);
                Ok(())
            }
        }
    }

    async fn get(&self, name: &str) -> StoreResult<AgentModel> {
        self.models
            .get(name)
            .map(|m| m.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn update(&self, model: AgentModel) -> StoreResult<()> {
        model.validate()?;
        match self.models.get_mut(&model.name) {
            Some(mut existing) => {
                *existing = model;
                Ok(())
            }
            None => Err(not_found(&model.name)),
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        self.models
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn list(&self) -> StoreResult<Vec<AgentModel>> {
        let mut models: Vec<AgentModel> = self.models.iter().map(|e| e.value().clone()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

fn not_found(name: &str) -> StoreError {
    StoreError::NotFound {
        kind: KIND,
        name: name.to_string(),
    }
}

/// Capability-checked mutation of agent models.
#[derive(Clone)]
pub struct AgentModelAdmin {
    store: Arc<dyn AgentModelStore>,
    policy: Arc<dyn PolicyGate>,
}

impl AgentModelAdmin {
    pub fn new(store: Arc<dyn AgentModelStore>, policy: Arc<dyn PolicyGate>) -> Self {
        Self { store, policy }
    }

    fn authorize(&self) -> StoreResult<()> {
        Ok(self.policy.check(&Capability::model_admin())?)
    }

    pub async fn register(&self, model: AgentModel) -> StoreResult<()> {
        self.authorize()?;
        info!(model = %model.name, "agent model registered");
        self.store.register(model).await
    }

    pub async fn update(&self, model: AgentModel) -> StoreResult<()> {
        self.authorize()?;
        self.store.update(model).await
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.authorize()?;
        self.store.delete(name).await
    }

    pub async fn get(&self, name: &str) -> StoreResult<AgentModel> {
        self.store.get(name).await
    }

    pub async fn list(&self) -> StoreResult<Vec<AgentModel>> {
        self.store.list().await
    }

    pub fn reader(&self) -> AgentModelReader {
        AgentModelReader::new(self.store.clone())
    }
}

/// Read-only view handed to scripts and the `ask` loop.
#[derive(Clone)]
pub struct AgentModelReader {
    store: Arc<dyn AgentModelStore>,
}

impl AgentModelReader {
    pub fn new(store: Arc<dyn AgentModelStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, name: &str) -> StoreResult<AgentModel> {
        self.store.get(name).await
    }

    pub async fn list(&self) -> StoreResult<Vec<AgentModel>> {
        self.store.list().await
    }
}
