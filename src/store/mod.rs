//! Host-side stores the engine reads during `ask`.
//!
//! Mutation goes through the admin wrappers, which check a capability
//! before touching the store. Scripts only ever get the read accessors.

pub mod account;
pub mod agent_model;

use thiserror::Error;

use crate::error::{ErrorCode, RuntimeError};
use crate::policy::PolicyError;

pub use account::{Account, AccountAdmin, AccountStore, InMemoryAccountStore};
pub use agent_model::{
    AgentModel, AgentModelAdmin, AgentModelReader, AgentModelStore, InMemoryAgentModelStore,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: &'static str, name: String },
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::NotFound { .. } => ErrorCode::KeyNotFound,
            StoreError::Duplicate { .. } => ErrorCode::Duplicate,
            StoreError::Invalid { .. } => ErrorCode::Type,
            StoreError::Policy(_) => ErrorCode::Policy,
        };
        RuntimeError::new(code, err.to_string()).with_cause(err)
    }
}

impl From<PolicyError> for RuntimeError {
    fn from(err: PolicyError) -> Self {
        RuntimeError::new(ErrorCode::Policy, err.to_string()).with_cause(err)
    }
}
