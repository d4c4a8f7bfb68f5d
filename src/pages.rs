//! Console page definitions.
//!
//! Each builder returns a fresh [`Page`]; capabilities are attached while the
//! tree is assembled and never change afterwards.

use anyhow::Result;

use crate::capability::{CapabilityDescriptor, EntityType};
use crate::component::{Page, SecurableComponent};

pub const AUDIT_SETTINGS: &str = "audit-settings";
pub const SYSTEM_SETTINGS: &str = "system-settings";
pub const POLICY_MIGRATION: &str = "policy-migration";

pub const PAGE_NAMES: [&str; 3] = [AUDIT_SETTINGS, SYSTEM_SETTINGS, POLICY_MIGRATION];

// Dispatch targets, relative to the page root.
pub const AUDIT_PURGE_TARGET: &str = "auditDeleteForm:delete";
pub const LICENSE_DELETE_TARGET: &str = "licenseContainer:licenseDeleteForm:deleteLicense";
pub const GLOBAL_SAVE_TARGET: &str = "globalForm:save";
pub const PREVIOUS_MIGRATIONS_TARGET: &str = "previousMigrations";
pub const MIGRATION_RENAME_TARGET: &str = "previousMigrations:migrationEditForm:save";
pub const MIGRATION_CONFIRM_TARGET: &str = "confirmForm:confirm";
pub const MIGRATION_DOWNLOAD_TARGET: &str = "downloadForm:download";

pub fn audit_settings_page() -> Result<Page> {
    Page::new(
        AUDIT_SETTINGS,
        SecurableComponent::container("content")
            .child(SecurableComponent::label("title"))
            .child(
                SecurableComponent::form("auditDeleteForm")
                    .with_capability(CapabilityDescriptor::attempted_delete_all(
                        EntityType::AuditRecord,
                    ))
                    .child(SecurableComponent::field("minAge"))
                    .child(SecurableComponent::field("delete")),
            ),
    )
}

pub fn system_settings_page() -> Result<Page> {
    Page::new(
        SYSTEM_SETTINGS,
        SecurableComponent::container("content")
            .child(
                SecurableComponent::container("licenseContainer")
                    .with_capability(CapabilityDescriptor::attempted_read(EntityType::License, None))
                    .child(SecurableComponent::label("licenseDetails"))
                    .child(
                        SecurableComponent::form("licenseDeleteForm")
                            .with_capability(CapabilityDescriptor::attempted_update_any(
                                EntityType::ClusterProperty,
                            ))
                            .child(SecurableComponent::field("deleteLicense")),
                    ),
            )
            .child(
                SecurableComponent::form("globalForm")
                    .with_capability(CapabilityDescriptor::attempted_update_any(
                        EntityType::ClusterProperty,
                    ))
                    .child(SecurableComponent::field("properties"))
                    .child(SecurableComponent::field("save")),
            ),
    )
}

pub fn policy_migration_page() -> Result<Page> {
    build_policy_migration_page(CapabilityDescriptor::attempted_update_any(
        EntityType::MigrationRecord,
    ))
}

/// The policy migration page with the edit form scoped to one record, so a
/// grant on that record alone can authorize the rename.
pub fn policy_migration_page_for_record(record_id: i64) -> Result<Page> {
    build_policy_migration_page(CapabilityDescriptor::attempted_update(
        EntityType::MigrationRecord,
        &record_id.to_string(),
    ))
}

fn build_policy_migration_page(edit: CapabilityDescriptor) -> Result<Page> {
    Page::new(
        POLICY_MIGRATION,
        SecurableComponent::container("content")
            .child(
                SecurableComponent::container("previousMigrations")
                    .with_capability(CapabilityDescriptor::attempted_read(
                        EntityType::MigrationRecord,
                        None,
                    ))
                    .child(SecurableComponent::label("migrationList"))
                    .child(
                        SecurableComponent::form("migrationEditForm")
                            .with_capability(edit)
                            .child(SecurableComponent::field("name"))
                            .child(SecurableComponent::field("save")),
                    ),
            )
            .child(
                SecurableComponent::form("confirmForm")
                    .with_capability(CapabilityDescriptor::attempted_create(
                        EntityType::MigrationRecord,
                    ))
                    .child(SecurableComponent::field("label"))
                    .child(SecurableComponent::field("items"))
                    .child(SecurableComponent::field("confirm")),
            )
            .child(
                SecurableComponent::form("downloadForm")
                    .with_capability(CapabilityDescriptor::attempted_read_all(EntityType::Policy))
                    .child(SecurableComponent::field("password"))
                    .child(SecurableComponent::field("confirm"))
                    .child(SecurableComponent::field("download")),
            ),
    )
}

pub fn page_by_name(name: &str) -> Result<Option<Page>> {
    match name {
        AUDIT_SETTINGS => audit_settings_page().map(Some),
        SYSTEM_SETTINGS => system_settings_page().map(Some),
        POLICY_MIGRATION => policy_migration_page().map(Some),
        _ => Ok(None),
    }
}
