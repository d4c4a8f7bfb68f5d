//! Authorization oracle.
//!
//! The oracle answers allow/deny for a (principal, capability descriptor) pair.
//! It is a stateless facade over a [`PermissionStore`]: every check reads the
//! store afresh, so a revoked grant is observed by the very next render pass or
//! dispatch. Any error inside the lookup is a denial.

mod policy;
mod store;

pub use policy::PolicyFile;
pub use store::{InMemoryPermissionStore, SqlitePermissionStore};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, EntityType, OperationKind};
use crate::principal::Principal;

/// Why a check came back negative.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NoMatchingGrant,
    OracleError(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl AuthorizationDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Who a grant is attached to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Role(String),
    Principal(String),
}

impl Subject {
    pub fn role(name: &str) -> Self {
        Subject::Role(name.trim().to_lowercase())
    }

    pub fn principal(id: &str) -> Self {
        Subject::Principal(id.trim().to_string())
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Subject::Role(_) => "role",
            Subject::Principal(_) => "principal",
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Subject::Role(name) | Subject::Principal(name) => name,
        }
    }
}

/// A permission held by a subject.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Grant {
    pub operation: OperationKind,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl Grant {
    pub fn new(operation: OperationKind, entity_type: EntityType) -> Self {
        Self {
            operation,
            entity_type,
            entity_id: None,
        }
    }

    pub fn for_entity(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// Whether this grant permits the attempted operation.
    pub fn covers(&self, attempted: &CapabilityDescriptor) -> bool {
        if !self.operation.implies(attempted.operation()) {
            return false;
        }
        if self.entity_type != EntityType::Any && self.entity_type != attempted.entity_type() {
            return false;
        }
        match (&self.entity_id, attempted.entity_id()) {
            (None, _) => true,
            (Some(granted), Some(wanted)) => granted == wanted,
            (Some(_), None) => false,
        }
    }
}

/// Source of grants. Owns whatever synchronisation its backing state needs.
pub trait PermissionStore: Send + Sync {
    fn grants_for(&self, principal: &Principal) -> Result<Vec<Grant>>;
}

/// Allow/deny for a principal attempting a capability.
pub trait AuthorizationOracle: Send + Sync {
    /// Raw decision; may fail if the underlying lookup fails.
    fn decide(
        &self,
        principal: &Principal,
        descriptor: &CapabilityDescriptor,
    ) -> Result<AuthorizationDecision>;

    /// Fail-closed check. No descriptor is always allowed.
    fn check(
        &self,
        principal: &Principal,
        descriptor: Option<&CapabilityDescriptor>,
    ) -> AuthorizationDecision {
        let Some(descriptor) = descriptor else {
            return AuthorizationDecision::allow();
        };
        match self.decide(principal, descriptor) {
            Ok(decision) => decision,
            Err(err) => {
                log::warn!(
                    "authorization lookup failed for {} attempting {}; denying: {}",
                    principal.id(),
                    descriptor,
                    err
                );
                AuthorizationDecision::deny(DenyReason::OracleError(err.to_string()))
            }
        }
    }

    fn is_authorized(
        &self,
        principal: &Principal,
        descriptor: Option<&CapabilityDescriptor>,
    ) -> bool {
        self.check(principal, descriptor).allowed
    }
}

/// Oracle backed by role and principal grants.
pub struct RoleGrantOracle<S> {
    store: S,
}

impl<S: PermissionStore> RoleGrantOracle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: PermissionStore> AuthorizationOracle for RoleGrantOracle<S> {
    fn decide(
        &self,
        principal: &Principal,
        descriptor: &CapabilityDescriptor,
    ) -> Result<AuthorizationDecision> {
        let grants = self.store.grants_for(principal)?;
        if grants.iter().any(|grant| grant.covers(descriptor)) {
            Ok(AuthorizationDecision::allow())
        } else {
            Ok(AuthorizationDecision::deny(DenyReason::NoMatchingGrant))
        }
    }
}

impl<O: AuthorizationOracle + ?Sized> AuthorizationOracle for std::sync::Arc<O> {
    fn decide(
        &self,
        principal: &Principal,
        descriptor: &CapabilityDescriptor,
    ) -> Result<AuthorizationDecision> {
        (**self).decide(principal, descriptor)
    }
}
