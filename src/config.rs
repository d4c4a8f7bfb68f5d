use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::actions::audit::PURGE_AGE_RANGE;
use crate::principal::Principal;

const DEFAULT_DB_PATH: &str = "console.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8797";
const DEFAULT_AUDIT_MIN_AGE_DAYS: i64 = 30;
const DEFAULT_MIGRATION_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize, Default)]
struct ConsoleConfigFile {
    db_path: Option<String>,
    policy_path: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    #[serde(default)]
    sessions: Vec<SessionEntry>,
    audit: Option<AuditConfigFile>,
    migrations: Option<MigrationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AuditConfigFile {
    default_min_age_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct MigrationConfigFile {
    list_limit: Option<usize>,
}

/// A bearer token bound to one principal.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SessionEntry {
    pub token: String,
    pub principal: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SessionEntry {
    pub fn to_principal(&self) -> Result<Principal> {
        Ok(Principal::new(&self.principal)?
            .with_roles(self.roles.iter().map(String::as_str))
            .with_session(&session_ref(&self.token)))
    }
}

/// Non-reversible handle for logs; the token itself is never logged.
fn session_ref(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(token.as_bytes());
    format!("session:{}", hex::encode(&digest[..6]))
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub db_path: String,
    pub api_addr: String,
    pub policy_path: Option<PathBuf>,
    pub sessions: Vec<SessionEntry>,
    pub audit_default_min_age_days: i64,
    pub migration_list_limit: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            policy_path: None,
            sessions: Vec::new(),
            audit_default_min_age_days: DEFAULT_AUDIT_MIN_AGE_DAYS,
            migration_list_limit: DEFAULT_MIGRATION_LIST_LIMIT,
        }
    }
}

impl ConsoleConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CONSOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConsoleConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or(defaults.api_addr),
            policy_path: file.policy_path,
            sessions: file.sessions,
            audit_default_min_age_days: file
                .audit
                .and_then(|audit| audit.default_min_age_days)
                .unwrap_or(defaults.audit_default_min_age_days),
            migration_list_limit: file
                .migrations
                .and_then(|m| m.list_limit)
                .unwrap_or(defaults.migration_list_limit),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CONSOLE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("CONSOLE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(path) = std::env::var("CONSOLE_POLICY_PATH") {
            if !path.trim().is_empty() {
                self.policy_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(days) = std::env::var("CONSOLE_AUDIT_MIN_AGE_DAYS") {
            self.audit_default_min_age_days = days.trim().parse().map_err(|_| {
                anyhow!("CONSOLE_AUDIT_MIN_AGE_DAYS must be an integer number of days")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !PURGE_AGE_RANGE.contains(self.audit_default_min_age_days) {
            return Err(anyhow!(
                "audit.default_min_age_days must be between {} and {}",
                PURGE_AGE_RANGE.min,
                PURGE_AGE_RANGE.max
            ));
        }
        if self.migration_list_limit == 0 {
            return Err(anyhow!("migrations.list_limit must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for session in &mut self.sessions {
            session.token = session.token.trim().to_string();
            if session.token.is_empty() {
                return Err(anyhow!("session token for '{}' cannot be empty", session.principal));
            }
            if !seen.insert(session.token.clone()) {
                return Err(anyhow!("duplicate session token for '{}'", session.principal));
            }
            session.to_principal()?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConsoleConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
