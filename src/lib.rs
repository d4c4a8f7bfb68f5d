//! Console Gate
//!
//! Capability-based access control for an administrative console.
//!
//! # Architecture
//!
//! Every securable page element may carry one capability descriptor
//! (operation, entity type, optional entity id). Two hooks consult the
//! authorization oracle:
//!
//! 1. **Render pass**: derives visible/enabled for each node. A denied parent
//!    denies its whole subtree without further oracle calls. Denied form
//!    controls stay visible but inert; everything else is hidden.
//! 2. **Pre-dispatch check**: a submission whose target (or any ancestor) is
//!    denied fails with [`gate::AuthorizationError`] before any handler runs.
//!
//! The oracle is fail-closed: a store error is logged and treated as a denial.
//!
//! # Module Structure
//!
//! - `capability`, `principal`: what is attempted, and by whom
//! - `oracle`: grant stores (in-memory, SQLite, TOML policy file) and the oracle
//! - `component`, `gate`: the component tree and its lifecycle hooks
//! - `validation`, `secure`, `json`: form plumbing and the JSON boundary
//! - `actions`, `archive`, `pages`: console features built on the above
//! - `api`, `config`: the HTTP JSON service
//! - `admin`: the `console_admin` command line

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod actions;
pub mod admin;
pub mod api;
pub mod archive;
pub mod capability;
pub mod component;
pub mod config;
pub mod gate;
pub mod json;
pub mod oracle;
pub mod pages;
pub mod principal;
pub mod secure;
pub mod validation;

pub use capability::{CapabilityDescriptor, EntityType, OperationKind};
pub use component::{ComponentKind, ComponentPath, Page, SecurableComponent};
pub use gate::{is_authorization_failure, AuthorizationError, PageGate, RenderPlan, RequestContext};
pub use json::JsonResponse;
pub use oracle::{
    AuthorizationOracle, Grant, InMemoryPermissionStore, PermissionStore, PolicyFile,
    RoleGrantOracle, SqlitePermissionStore, Subject,
};
pub use principal::Principal;
pub use secure::{FormHandler, JsonDataForm, Securable, SubmitOutcome};
pub use validation::Feedback;

/// Unique URI for an in-memory SQLite database that several connections can share.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:console_gate_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
