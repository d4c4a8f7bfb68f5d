use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};

use super::{Grant, PermissionStore, Subject};
use crate::principal::Principal;

fn subjects_of(principal: &Principal) -> Vec<Subject> {
    let mut subjects: Vec<Subject> = principal.roles().map(Subject::role).collect();
    subjects.push(Subject::principal(principal.id()));
    subjects
}

/// Grants held in memory. The lock is owned here; the oracle never locks.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    grants: RwLock<BTreeMap<Subject, Vec<Grant>>>,
}

impl InMemoryPermissionStore {
    pub fn grant(&self, subject: Subject, grant: Grant) -> Result<()> {
        let mut grants = self
            .grants
            .write()
            .map_err(|_| anyhow!("permission store lock poisoned"))?;
        let entry = grants.entry(subject).or_default();
        if !entry.contains(&grant) {
            entry.push(grant);
        }
        Ok(())
    }

    pub fn revoke(&self, subject: &Subject, grant: &Grant) -> Result<bool> {
        let mut grants = self
            .grants
            .write()
            .map_err(|_| anyhow!("permission store lock poisoned"))?;
        let Some(entry) = grants.get_mut(subject) else {
            return Ok(false);
        };
        let before = entry.len();
        entry.retain(|g| g != grant);
        Ok(entry.len() != before)
    }
}

impl PermissionStore for InMemoryPermissionStore {
    fn grants_for(&self, principal: &Principal) -> Result<Vec<Grant>> {
        let grants = self
            .grants
            .read()
            .map_err(|_| anyhow!("permission store lock poisoned"))?;
        let mut out = Vec::new();
        for subject in subjects_of(principal) {
            if let Some(held) = grants.get(&subject) {
                out.extend(held.iter().cloned());
            }
        }
        Ok(out)
    }
}

/// Grants persisted in SQLite.
pub struct SqlitePermissionStore {
    conn: Mutex<Connection>,
}

impl SqlitePermissionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS grants (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              subject_kind TEXT NOT NULL,
              subject TEXT NOT NULL,
              operation TEXT NOT NULL,
              entity_type TEXT NOT NULL,
              entity_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_grants_subject ON grants(subject_kind, subject);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("permission store connection poisoned"))
    }

    pub fn grant(&self, subject: &Subject, grant: &Grant) -> Result<()> {
        if self.list(subject)?.contains(grant) {
            return Ok(());
        }
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO grants(subject_kind, subject, operation, entity_type, entity_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                subject.kind(),
                subject.name(),
                grant.operation.as_str(),
                grant.entity_type.as_str(),
                grant.entity_id
            ],
        )?;
        Ok(())
    }

    pub fn revoke(&self, subject: &Subject, grant: &Grant) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            r#"
            DELETE FROM grants
            WHERE subject_kind = ?1 AND subject = ?2 AND operation = ?3 AND entity_type = ?4
              AND entity_id IS ?5
            "#,
            params![
                subject.kind(),
                subject.name(),
                grant.operation.as_str(),
                grant.entity_type.as_str(),
                grant.entity_id
            ],
        )?;
        Ok(removed > 0)
    }

    pub fn list(&self, subject: &Subject) -> Result<Vec<Grant>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT operation, entity_type, entity_id FROM grants WHERE subject_kind = ?1 AND subject = ?2 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![subject.kind(), subject.name()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let operation: String = row.get(0)?;
            let entity_type: String = row.get(1)?;
            let entity_id: Option<String> = row.get(2)?;
            out.push(Grant {
                operation: operation.parse()?,
                entity_type: entity_type.parse()?,
                entity_id,
            });
        }
        Ok(out)
    }
}

impl PermissionStore for SqlitePermissionStore {
    fn grants_for(&self, principal: &Principal) -> Result<Vec<Grant>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for subject in subjects_of(principal) {
            for grant in self.list(&subject)? {
                if seen.insert(grant.clone()) {
                    out.push(grant);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{EntityType, OperationKind};

    #[test]
    fn in_memory_revoke_is_seen_by_next_lookup() {
        let store = InMemoryPermissionStore::default();
        let grant = Grant::new(OperationKind::ReadAll, EntityType::MigrationRecord);
        store.grant(Subject::role("admin"), grant.clone()).unwrap();
        let p = Principal::new("root").unwrap().with_role("admin");
        assert_eq!(store.grants_for(&p).unwrap().len(), 1);
        assert!(store.revoke(&Subject::role("admin"), &grant).unwrap());
        assert!(store.grants_for(&p).unwrap().is_empty());
    }

    #[test]
    fn principal_grants_apply_without_roles() {
        let store = InMemoryPermissionStore::default();
        store
            .grant(
                Subject::principal("bob"),
                Grant::new(OperationKind::Create, EntityType::MigrationRecord),
            )
            .unwrap();
        let p = Principal::new("bob").unwrap();
        assert_eq!(store.grants_for(&p).unwrap().len(), 1);
    }

    #[test]
    fn sqlite_grants_round_trip_through_storage() {
        let store = SqlitePermissionStore::open(":memory:").unwrap();
        let subject = Subject::role("operator");
        let scoped = Grant::new(OperationKind::Update, EntityType::MigrationRecord).for_entity("9");
        store.grant(&subject, &scoped).unwrap();
        store.grant(&subject, &scoped).unwrap();
        store
            .grant(
                &subject,
                &Grant::new(OperationKind::DeleteAll, EntityType::AuditRecord),
            )
            .unwrap();

        let p = Principal::new("carol").unwrap().with_role("operator");
        let grants = store.grants_for(&p).unwrap();
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0], scoped);

        assert!(store.revoke(&subject, &scoped).unwrap());
        assert!(!store.revoke(&subject, &scoped).unwrap());
        assert_eq!(store.grants_for(&p).unwrap().len(), 1);
    }
}
