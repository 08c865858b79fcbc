use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::SecretString;

use crate::policy::{Capability, PolicyGate};

use super::{StoreError, StoreResult};

const KIND: &str = "account";

/// Provider credentials. The key is resolved out-of-band by `ask` and never
/// becomes a script value.
#[derive(Clone)]
pub struct Account {
    pub name: String,
    pub provider: String,
    pub api_key: SecretString,
}

impl Account {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            api_key: SecretString::from(api_key.into()),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn register(&self, account: Account) -> StoreResult<()>;
    async fn get(&self, name: &str) -> StoreResult<Account>;
    async fn update(&self, account: Account) -> StoreResult<()>;
    async fn delete(&self, name: &str) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(name: &str) -> StoreError {
    StoreError::NotFound {
        kind: KIND,
        name: name.to_string(),
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn register(&self, account: Account) -> StoreResult<()> {
        if self.accounts.contains_key(&account.name) {
            return Err(StoreError::Duplicate {
                kind: KIND,
                name: account.name,
            });
        }
        self.accounts.insert(account.name.clone(), account);
        Ok(())
    }

    async fn get(&self, name: &str) -> StoreResult<Account> {
        self.accounts
            .get(name)
            .map(|a| a.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn update(&self, account: Account) -> StoreResult<()> {
        match self.accounts.get_mut(&account.name) {
            Some(mut existing) => {
                *existing = account;
                Ok(())
            }
            None => Err(not_found(&account.name)),
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        self.accounts
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.accounts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

/// Capability-checked mutation of accounts.
#[derive(Clone)]
pub struct AccountAdmin {
    store: Arc<dyn AccountStore>,
    policy: Arc<dyn PolicyGate>,
}

impl AccountAdmin {
    pub fn new(store: Arc<dyn AccountStore>, policy: Arc<dyn PolicyGate>) -> Self {
        Self { store, policy }
    }

    fn authorize(&self) -> StoreResult<()> {
        Ok(self.policy.check(&Capability::account_admin())?)
    }

    pub async fn register(&self, account: Account) -> StoreResult<()> {
        self.authorize()?;
        self.store.register(account).await
    }

    pub async fn update(&self, account: Account) -> StoreResult<()> {
        self.authorize()?;
        self.store.update(account).await
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.authorize()?;
        self.store.delete(name).await
    }

    pub async fn list(&self) -> StoreResult<Vec<String>> {
        self.store.list().await
    }
}
