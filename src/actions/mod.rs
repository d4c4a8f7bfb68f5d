//! Business actions behind the console forms.

pub mod audit;
pub mod migration;
pub mod policy_migration;

pub use audit::{AuditPurgeForm, AuditPurgeRequest, AuditRecordStore, InMemoryAuditStore, SqliteAuditStore};
pub use migration::{
    previous_migrations, InMemoryMigrationRecordStore, MigrationRecord, MigrationRecordStore,
    MigrationRenameForm, SqliteMigrationRecordStore,
};
pub use policy_migration::{MigrationConfirmForm, MigrationDownloadForm, MigrationSelection};
