//! Capability gate consulted before privileged operations.
//!
//! The policy language and its evaluator live outside the engine; all the
//! engine needs is a `check(capability)` that either passes or explains the
//! denial. The same gate instance is shared by reference between an
//! interpreter and every fork made from it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub resource: String,
    pub verb: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Capability {
    pub fn new(resource: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            verb: verb.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn model_admin() -> Self {
        Self::new("model", "admin")
    }

    pub fn model_read() -> Self {
        Self::new("model", "read")
    }

    pub fn account_admin() -> Self {
        Self::new("account", "admin")
    }

    pub fn event_emit() -> Self {
        Self::new("event", "emit")
    }

    /// Whether a grant of `self` satisfies a request for `requested`.
    /// An unscoped grant covers every scope.
    pub fn covers(&self, requested: &Capability) -> bool {
        let resource = self.resource == WILDCARD || self.resource == requested.resource;
        let verb = self.verb == WILDCARD || self.verb == requested.verb;
        let scope = match (&self.scope, &requested.scope) {
            (None, _) => true,
            (Some(granted), Some(wanted)) => granted == WILDCARD || granted == wanted,
            (Some(_), None) => false,
        };
        resource && verb && scope
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}:{}", self.resource, self.verb, scope),
            None => write!(f, "{}:{}", self.resource, self.verb),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("capability denied: {0}")]
    Denied(String),
}

#[mockall::automock]
pub trait PolicyGate: Send + Sync {
    fn check(&self, capability: &Capability) -> Result<(), PolicyError>;
}

/// Grants everything. Default for trusted hosts and tests.
#[derive(Debug, Default, Clone)]
pub struct AllowAll;

impl PolicyGate for AllowAll {
    fn check(&self, _capability: &Capability) -> Result<(), PolicyError> {
        Ok(())
    }
}

/// Allow-list of granted capabilities.
#[derive(Debug, Default, Clone)]
pub struct GrantSet {
    grants: Vec<Capability>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, capability: Capability) -> Self {
        self.grants.push(capability);
        self
    }
}

impl FromIterator<Capability> for GrantSet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}

impl PolicyGate for GrantSet {
    fn check(&self, capability: &Capability) -> Result<(), PolicyError> {
        if self.grants.iter().any(|g| g.covers(capability)) {
            Ok(())
        } else {
            Err(PolicyError::Denied(capability.to_string()))
        }
    }
}
