use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use super::{Grant, InMemoryPermissionStore, SqlitePermissionStore, Subject};

#[derive(Debug, Deserialize)]
struct GrantEntry {
    role: Option<String>,
    principal: Option<String>,
    operation: String,
    entity_type: String,
    entity_id: Option<String>,
}

/// Role grants loaded from a TOML policy file.
///
/// ```toml
/// [[grant]]
/// role = "operator"
/// operation = "DELETE_ALL"
/// entity_type = "AUDIT_RECORD"
/// ```
#[derive(Debug, Deserialize, Default)]
pub struct PolicyFile {
    #[serde(default)]
    grant: Vec<GrantEntry>,
}

impl PolicyFile {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read policy file {}: {}", path.display(), e))?;
        Self::parse(&raw).map_err(|e| anyhow!("invalid policy file {}: {}", path.display(), e))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn entries(&self) -> Result<Vec<(Subject, Grant)>> {
        let mut out = Vec::with_capacity(self.grant.len());
        for entry in &self.grant {
            let subject = match (&entry.role, &entry.principal) {
                (Some(role), None) => Subject::role(role),
                (None, Some(principal)) => Subject::principal(principal),
                _ => {
                    return Err(anyhow!(
                        "policy grant must name exactly one of role or principal"
                    ))
                }
            };
            if subject.name().is_empty() {
                return Err(anyhow!("policy grant subject cannot be empty"));
            }
            let mut grant = Grant::new(entry.operation.parse()?, entry.entity_type.parse()?);
            if let Some(id) = entry.entity_id.as_deref().map(str::trim) {
                if !id.is_empty() {
                    grant = grant.for_entity(id);
                }
            }
            out.push((subject, grant));
        }
        Ok(out)
    }

    pub fn into_store(self) -> Result<InMemoryPermissionStore> {
        let store = InMemoryPermissionStore::default();
        for (subject, grant) in self.entries()? {
            store.grant(subject, grant)?;
        }
        Ok(store)
    }

    /// Seed a persistent store; grants already present are left alone.
    pub fn apply_to(&self, store: &SqlitePermissionStore) -> Result<usize> {
        let entries = self.entries()?;
        for (subject, grant) in &entries {
            store.grant(subject, grant)?;
        }
        Ok(entries.len())
    }
}
