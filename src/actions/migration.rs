use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, EntityType};
use crate::gate::RequestContext;
use crate::secure::{FormHandler, Securable};
use crate::validation::{Feedback, StringLengthValidator, Validator};

pub const NAME_FIELD: &str = "name";
pub const NAME_LENGTH: StringLengthValidator = StringLengthValidator::new(0, 32);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i64,
    pub name: String,
    pub owner: String,
    pub source_cluster: String,
    pub target_cluster: String,
    pub created_at: i64,
    pub summary: String,
}

/// Fields of a record that does not exist yet.
#[derive(Clone, Debug)]
pub struct NewMigrationRecord {
    pub name: String,
    pub owner: String,
    pub source_cluster: String,
    pub target_cluster: String,
    pub created_at: i64,
    pub summary: String,
}

pub trait MigrationRecordStore {
    fn save(&mut self, record: NewMigrationRecord) -> Result<i64>;

    fn find(&self, id: i64) -> Result<Option<MigrationRecord>>;

    /// Records with a non-empty name, newest first. `owner` restricts to one principal.
    fn find_named(&self, owner: Option<&str>, limit: usize) -> Result<Vec<MigrationRecord>>;

    fn rename(&mut self, id: i64, name: &str) -> Result<bool>;
}

impl<S: MigrationRecordStore + ?Sized> MigrationRecordStore for &mut S {
    fn save(&mut self, record: NewMigrationRecord) -> Result<i64> {
        (**self).save(record)
    }

    fn find(&self, id: i64) -> Result<Option<MigrationRecord>> {
        (**self).find(id)
    }

    fn find_named(&self, owner: Option<&str>, limit: usize) -> Result<Vec<MigrationRecord>> {
        (**self).find_named(owner, limit)
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<bool> {
        (**self).rename(id, name)
    }
}

pub struct SqliteMigrationRecordStore {
    conn: Connection,
}

impl SqliteMigrationRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS migration_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              owner TEXT NOT NULL,
              source_cluster TEXT NOT NULL,
              target_cluster TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              summary TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_migration_owner ON migration_records(owner);
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MigrationRecord> {
        Ok(MigrationRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            owner: row.get(2)?,
            source_cluster: row.get(3)?,
            target_cluster: row.get(4)?,
            created_at: row.get(5)?,
            summary: row.get(6)?,
        })
    }
}

impl MigrationRecordStore for SqliteMigrationRecordStore {
    fn save(&mut self, record: NewMigrationRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO migration_records(name, owner, source_cluster, target_cluster, created_at, summary)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.name,
                record.owner,
                record.source_cluster,
                record.target_cluster,
                record.created_at,
                record.summary
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn find(&self, id: i64) -> Result<Option<MigrationRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, name, owner, source_cluster, target_cluster, created_at, summary FROM migration_records WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn find_named(&self, owner: Option<&str>, limit: usize) -> Result<Vec<MigrationRecord>> {
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit exceeds i64 range"))?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, owner, source_cluster, target_cluster, created_at, summary
            FROM migration_records
            WHERE name <> '' AND (?1 IS NULL OR owner = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![owner, limit], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE migration_records SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        Ok(updated > 0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryMigrationRecordStore {
    records: Vec<MigrationRecord>,
}

impl MigrationRecordStore for InMemoryMigrationRecordStore {
    fn save(&mut self, record: NewMigrationRecord) -> Result<i64> {
        let id = self.records.last().map(|r| r.id + 1).unwrap_or(1);
        self.records.push(MigrationRecord {
            id,
            name: record.name,
            owner: record.owner,
            source_cluster: record.source_cluster,
            target_cluster: record.target_cluster,
            created_at: record.created_at,
            summary: record.summary,
        });
        Ok(id)
    }

    fn find(&self, id: i64) -> Result<Option<MigrationRecord>> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    fn find_named(&self, owner: Option<&str>, limit: usize) -> Result<Vec<MigrationRecord>> {
        let mut out: Vec<MigrationRecord> = self
            .records
            .iter()
            .filter(|r| !r.name.is_empty())
            .filter(|r| owner.map_or(true, |o| r.owner == o))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<bool> {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.name = name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PreviousMigration {
    pub id: i64,
    pub name: String,
}

/// Named migrations visible to the principal.
///
/// Without `READ_ALL MIGRATION_RECORD` only the principal's own records are listed.
pub fn previous_migrations<S: MigrationRecordStore + ?Sized>(
    ctx: RequestContext<'_>,
    store: &S,
    limit: usize,
) -> Result<Vec<PreviousMigration>> {
    let read_all = CapabilityDescriptor::attempted_read_all(EntityType::MigrationRecord);
    let owner = if ctx.allows(Some(&read_all)) {
        None
    } else {
        Some(ctx.principal.id())
    };
    let records = store.find_named(owner, limit)?;
    Ok(records
        .into_iter()
        .map(|r| PreviousMigration {
            id: r.id,
            name: r.name,
        })
        .collect())
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenameRequest {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// Edits the name of a previously performed migration.
pub struct MigrationRenameForm<S> {
    store: S,
}

impl<S: MigrationRecordStore> MigrationRenameForm<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn capability(record_id: i64) -> CapabilityDescriptor {
        CapabilityDescriptor::attempted_update(EntityType::MigrationRecord, &record_id.to_string())
    }

    pub fn secured(store: S, record_id: i64) -> Securable<Self> {
        Securable::new("migrationEditForm", Self::new(store))
            .with_capability(Self::capability(record_id))
    }
}

impl<S: MigrationRecordStore> FormHandler for MigrationRenameForm<S> {
    type Input = RenameRequest;
    type Output = MigrationRecord;

    fn validate(&self, input: &RenameRequest, feedback: &mut Feedback) {
        NAME_LENGTH.validate(NAME_FIELD, &input.name, feedback);
        match self.store.find(input.id) {
            Ok(Some(_)) => {}
            Ok(None) => feedback.form_error(format!("migration record {} not found", input.id)),
            Err(err) => {
                log::warn!("error loading migration record {}: {}", input.id, err);
                feedback.form_error("migration record could not be loaded");
            }
        }
    }

    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: RenameRequest,
        feedback: &mut Feedback,
    ) -> Result<MigrationRecord> {
        let name = input.name.trim();
        if !self.store.rename(input.id, name)? {
            return Err(anyhow!("migration record {} vanished during rename", input.id));
        }
        log::info!(
            "{} renamed migration record {} to '{}'",
            ctx.principal.id(),
            input.id,
            name
        );
        feedback.info("Migration updated.");
        self.store
            .find(input.id)?
            .ok_or_else(|| anyhow!("migration record {} vanished during rename", input.id))
    }
}
