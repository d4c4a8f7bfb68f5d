use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The authenticated actor a request runs on behalf of.
///
/// Authentication happens elsewhere; this crate only reads the principal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    id: String,
    roles: BTreeSet<String>,
    session_ref: Option<String>,
}

impl Principal {
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("principal id cannot be empty"));
        }
        Ok(Self {
            id: id.to_string(),
            roles: BTreeSet::new(),
            session_ref: None,
        })
    }

    pub fn with_role(mut self, role: &str) -> Self {
        let role = role.trim();
        if !role.is_empty() {
            self.roles.insert(role.to_lowercase());
        }
        self
    }

    pub fn with_roles<'a>(self, roles: impl IntoIterator<Item = &'a str>) -> Self {
        roles.into_iter().fold(self, |p, role| p.with_role(role))
    }

    pub fn with_session(mut self, session_ref: &str) -> Self {
        self.session_ref = Some(session_ref.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(&role.trim().to_lowercase())
    }

    pub fn session_ref(&self) -> Option<&str> {
        self.session_ref.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_normalized() {
        let p = Principal::new("alice")
            .unwrap()
            .with_roles(["Operator", " auditor ", ""]);
        assert!(p.has_role("operator"));
        assert!(p.has_role("AUDITOR"));
        assert_eq!(p.roles().count(), 2);
    }

    #[test]
    fn empty_id_rejected() {
        assert!(Principal::new("   ").is_err());
    }
}
