//! Capability descriptors: what operation, on what entity type, is being attempted.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation half of a capability descriptor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Read,
    ReadAll,
    Update,
    UpdateAny,
    Delete,
    DeleteAll,
    Other(String),
}

impl OperationKind {
    /// Whether holding `self` permits an attempt of `attempted`.
    ///
    /// The bulk forms cover their single-entity counterparts; nothing else is implied.
    pub fn implies(&self, attempted: &OperationKind) -> bool {
        if self == attempted {
            return true;
        }
        matches!(
            (self, attempted),
            (OperationKind::ReadAll, OperationKind::Read)
                | (OperationKind::UpdateAny, OperationKind::Update)
                | (OperationKind::DeleteAll, OperationKind::Delete)
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Read => "READ",
            OperationKind::ReadAll => "READ_ALL",
            OperationKind::Update => "UPDATE",
            OperationKind::UpdateAny => "UPDATE_ANY",
            OperationKind::Delete => "DELETE",
            OperationKind::DeleteAll => "DELETE_ALL",
            OperationKind::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "CREATE" => Ok(OperationKind::Create),
            "READ" => Ok(OperationKind::Read),
            "READ_ALL" => Ok(OperationKind::ReadAll),
            "UPDATE" => Ok(OperationKind::Update),
            "UPDATE_ANY" => Ok(OperationKind::UpdateAny),
            "DELETE" => Ok(OperationKind::Delete),
            "DELETE_ALL" => Ok(OperationKind::DeleteAll),
            "" => Err(anyhow!("operation kind cannot be empty")),
            _ => Ok(OperationKind::Other(normalized)),
        }
    }
}

/// Entity types the console gates access to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    AuditRecord,
    MigrationRecord,
    ClusterProperty,
    SsgKeyEntry,
    License,
    Policy,
    Folder,
    LogSink,
    User,
    EnterpriseFolder,
    /// Wildcard; only meaningful inside a grant.
    Any,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::AuditRecord => "AUDIT_RECORD",
            EntityType::MigrationRecord => "MIGRATION_RECORD",
            EntityType::ClusterProperty => "CLUSTER_PROPERTY",
            EntityType::SsgKeyEntry => "SSG_KEY_ENTRY",
            EntityType::License => "LICENSE",
            EntityType::Policy => "POLICY",
            EntityType::Folder => "FOLDER",
            EntityType::LogSink => "LOG_SINK",
            EntityType::User => "USER",
            EntityType::EnterpriseFolder => "ENTERPRISE_FOLDER",
            EntityType::Any => "ANY",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUDIT_RECORD" => Ok(EntityType::AuditRecord),
            "MIGRATION_RECORD" => Ok(EntityType::MigrationRecord),
            "CLUSTER_PROPERTY" => Ok(EntityType::ClusterProperty),
            "SSG_KEY_ENTRY" => Ok(EntityType::SsgKeyEntry),
            "LICENSE" => Ok(EntityType::License),
            "POLICY" => Ok(EntityType::Policy),
            "FOLDER" => Ok(EntityType::Folder),
            "LOG_SINK" => Ok(EntityType::LogSink),
            "USER" => Ok(EntityType::User),
            "ENTERPRISE_FOLDER" => Ok(EntityType::EnterpriseFolder),
            "ANY" => Ok(EntityType::Any),
            other => Err(anyhow!("unknown entity type: {}", other)),
        }
    }
}

/// An attempted operation on an entity type, optionally narrowed to one entity.
///
/// Immutable once built. Two descriptors are equal iff every field matches.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CapabilityDescriptor {
    operation: OperationKind,
    entity_type: EntityType,
    entity_id: Option<String>,
}

impl CapabilityDescriptor {
    pub fn new(operation: OperationKind, entity_type: EntityType, entity_id: Option<String>) -> Self {
        Self {
            operation,
            entity_type,
            entity_id: entity_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        }
    }

    pub fn attempted_create(entity_type: EntityType) -> Self {
        Self::new(OperationKind::Create, entity_type, None)
    }

    pub fn attempted_read(entity_type: EntityType, entity_id: Option<&str>) -> Self {
        Self::new(
            OperationKind::Read,
            entity_type,
            entity_id.map(str::to_string),
        )
    }

    pub fn attempted_read_all(entity_type: EntityType) -> Self {
        Self::new(OperationKind::ReadAll, entity_type, None)
    }

    pub fn attempted_update(entity_type: EntityType, entity_id: &str) -> Self {
        Self::new(
            OperationKind::Update,
            entity_type,
            Some(entity_id.to_string()),
        )
    }

    pub fn attempted_update_any(entity_type: EntityType) -> Self {
        Self::new(OperationKind::UpdateAny, entity_type, None)
    }

    pub fn attempted_delete(entity_type: EntityType, entity_id: &str) -> Self {
        Self::new(
            OperationKind::Delete,
            entity_type,
            Some(entity_id.to_string()),
        )
    }

    pub fn attempted_delete_all(entity_type: EntityType) -> Self {
        Self::new(OperationKind::DeleteAll, entity_type, None)
    }

    pub fn operation(&self) -> &OperationKind {
        &self.operation
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }
}

impl fmt::Display for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.entity_type)?;
        if let Some(id) = &self.entity_id {
            write!(f, "#{}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_compare_on_every_field() {
        let a = CapabilityDescriptor::attempted_delete_all(EntityType::AuditRecord);
        let b = CapabilityDescriptor::attempted_delete_all(EntityType::AuditRecord);
        let c = CapabilityDescriptor::attempted_delete_all(EntityType::MigrationRecord);
        let d = CapabilityDescriptor::attempted_update(EntityType::MigrationRecord, "7");
        let e = CapabilityDescriptor::attempted_update(EntityType::MigrationRecord, "8");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(d, e);
    }

    #[test]
    fn bulk_operations_imply_single_entity_forms() {
        assert!(OperationKind::DeleteAll.implies(&OperationKind::Delete));
        assert!(OperationKind::UpdateAny.implies(&OperationKind::Update));
        assert!(OperationKind::ReadAll.implies(&OperationKind::Read));
        assert!(!OperationKind::Delete.implies(&OperationKind::DeleteAll));
        assert!(!OperationKind::Read.implies(&OperationKind::Update));
    }

    #[test]
    fn display_includes_entity_id_when_present() {
        let d = CapabilityDescriptor::attempted_update(EntityType::MigrationRecord, "42");
        assert_eq!(d.to_string(), "UPDATE MIGRATION_RECORD#42");
        let all = CapabilityDescriptor::attempted_delete_all(EntityType::AuditRecord);
        assert_eq!(all.to_string(), "DELETE_ALL AUDIT_RECORD");
    }

    #[test]
    fn blank_entity_id_is_dropped() {
        let d = CapabilityDescriptor::new(
            OperationKind::Read,
            EntityType::Policy,
            Some("  ".to_string()),
        );
        assert_eq!(d.entity_id(), None);
    }

    #[test]
    fn parses_operation_and_entity_names() {
        assert_eq!(
            "update_any".parse::<OperationKind>().unwrap(),
            OperationKind::UpdateAny
        );
        assert_eq!(
            "export".parse::<OperationKind>().unwrap(),
            OperationKind::Other("EXPORT".to_string())
        );
        assert_eq!(
            "audit_record".parse::<EntityType>().unwrap(),
            EntityType::AuditRecord
        );
        assert!("widget".parse::<EntityType>().is_err());
    }
}
