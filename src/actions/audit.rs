use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, EntityType};
use crate::gate::RequestContext;
use crate::secure::{FormHandler, Securable};
use crate::validation::{Feedback, RangeValidator, Validator};

pub const MIN_AGE_FIELD: &str = "minAge";
pub const PURGE_AGE_RANGE: RangeValidator = RangeValidator::new(7, 365);
const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub id: i64,
    pub created_at: i64,
    pub level: String,
    pub message: String,
}

pub trait AuditRecordStore {
    fn append(&mut self, created_at: i64, level: &str, message: &str) -> Result<i64>;

    /// Delete every record created strictly before `cutoff_epoch_s`.
    fn delete_older_than(&mut self, cutoff_epoch_s: i64) -> Result<usize>;

    fn count(&self) -> Result<usize>;
}

impl<S: AuditRecordStore + ?Sized> AuditRecordStore for &mut S {
    fn append(&mut self, created_at: i64, level: &str, message: &str) -> Result<i64> {
        (**self).append(created_at, level, message)
    }

    fn delete_older_than(&mut self, cutoff_epoch_s: i64) -> Result<usize> {
        (**self).delete_older_than(cutoff_epoch_s)
    }

    fn count(&self) -> Result<usize> {
        (**self).count()
    }
}

pub struct SqliteAuditStore {
    conn: Connection,
}

impl SqliteAuditStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_records (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              level TEXT NOT NULL,
              message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_records(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl AuditRecordStore for SqliteAuditStore {
    fn append(&mut self, created_at: i64, level: &str, message: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO audit_records(created_at, level, message) VALUES (?1, ?2, ?3)",
            params![created_at, level, message],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn delete_older_than(&mut self, cutoff_epoch_s: i64) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM audit_records WHERE created_at < ?1",
            params![cutoff_epoch_s],
        )?;
        Ok(deleted)
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_records", [], |row| row.get(0))?;
        usize::try_from(n).map_err(|_| anyhow!("corrupt audit table: negative count"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryAuditStore {
    records: Vec<AuditRecord>,
    next_id: i64,
}

impl InMemoryAuditStore {
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }
}

impl AuditRecordStore for InMemoryAuditStore {
    fn append(&mut self, created_at: i64, level: &str, message: &str) -> Result<i64> {
        self.next_id += 1;
        self.records.push(AuditRecord {
            id: self.next_id,
            created_at,
            level: level.to_string(),
            message: message.to_string(),
        });
        Ok(self.next_id)
    }

    fn delete_older_than(&mut self, cutoff_epoch_s: i64) -> Result<usize> {
        let before = self.records.len();
        self.records.retain(|r| r.created_at >= cutoff_epoch_s);
        Ok(before - self.records.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuditPurgeRequest {
    #[serde(alias = "minAge")]
    pub min_age_days: Option<i64>,
}

/// `deleted` is `None` when the store failed; the failure is only logged.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PurgeResult {
    pub cutoff_epoch_s: i64,
    pub deleted: Option<usize>,
}

/// Deletes audit records older than the requested minimum age.
pub struct AuditPurgeForm<S> {
    store: S,
    clock: fn() -> Result<u64>,
}

impl<S: AuditRecordStore> AuditPurgeForm<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: crate::now_s,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Result<u64>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn capability() -> CapabilityDescriptor {
        CapabilityDescriptor::attempted_delete_all(EntityType::AuditRecord)
    }

    pub fn secured(store: S) -> Securable<Self> {
        Securable::new("auditDeleteForm", Self::new(store)).with_capability(Self::capability())
    }
}

impl<S: AuditRecordStore> FormHandler for AuditPurgeForm<S> {
    type Input = AuditPurgeRequest;
    type Output = PurgeResult;

    fn validate(&self, input: &AuditPurgeRequest, feedback: &mut Feedback) {
        PURGE_AGE_RANGE.validate(MIN_AGE_FIELD, &input.min_age_days, feedback);
    }

    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: AuditPurgeRequest,
        feedback: &mut Feedback,
    ) -> Result<PurgeResult> {
        let days = input
            .min_age_days
            .ok_or_else(|| anyhow!("minimum age missing after validation"))?;
        let now = i64::try_from((self.clock)()?).map_err(|_| anyhow!("clock exceeds i64 range"))?;
        let cutoff_epoch_s = now - days * SECONDS_PER_DAY;

        // Bulk delete failures are logged, never surfaced to the submitter.
        let deleted = match self.store.delete_older_than(cutoff_epoch_s) {
            Ok(n) => {
                log::info!(
                    "{} purged {} audit records older than {} days",
                    ctx.principal.id(),
                    n,
                    days
                );
                Some(n)
            }
            Err(err) => {
                log::warn!("error deleting audit records older than {} days: {}", days, err);
                None
            }
        };
        feedback.info(format!("Audit records older than {} days deleted.", days));
        Ok(PurgeResult {
            cutoff_epoch_s,
            deleted,
        })
    }
}
