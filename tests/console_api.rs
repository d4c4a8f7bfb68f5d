use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tempfile::tempdir;

use console_gate::actions::audit::{AuditRecordStore, SqliteAuditStore};
use console_gate::api::{ApiConfig, ApiHandle, ApiServer};
use console_gate::archive::open_archive;
use console_gate::config::SessionEntry;
use console_gate::{EntityType, Grant, InMemoryPermissionStore, OperationKind, RoleGrantOracle, Subject};

const AUDITOR: &str = "tok-auditor";
const VIEWER: &str = "tok-viewer";
const MIGRATOR: &str = "tok-migrator";
const DAY: i64 = 86_400;

fn session(token: &str, principal: &str, role: &str) -> SessionEntry {
    SessionEntry {
        token: token.to_string(),
        principal: principal.to_string(),
        roles: vec![role.to_string()],
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
    if let Some(token) = token {
        request.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    let body = body.unwrap_or("");
    if !body.is_empty() {
        request.push_str("Content-Type: application/json\r\n");
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("\r\n");
    request.push_str(body);
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

struct TestApi {
    _dir: tempfile::TempDir,
    db_path: String,
    oracle: Arc<RoleGrantOracle<InMemoryPermissionStore>>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(setup_db: impl FnOnce(&str) -> Result<()>) -> Result<Self> {
        let dir = tempdir()?;
        let db_path = dir.path().join("console.db").to_string_lossy().to_string();
        setup_db(&db_path)?;

        let store = InMemoryPermissionStore::default();
        store.grant(
            Subject::role("auditor"),
            Grant::new(OperationKind::DeleteAll, EntityType::AuditRecord),
        )?;
        for grant in [
            Grant::new(OperationKind::Read, EntityType::MigrationRecord),
            Grant::new(OperationKind::UpdateAny, EntityType::MigrationRecord),
            Grant::new(OperationKind::Create, EntityType::MigrationRecord),
            Grant::new(OperationKind::ReadAll, EntityType::Policy),
        ] {
            store.grant(Subject::role("migrator"), grant)?;
        }
        let oracle = Arc::new(RoleGrantOracle::new(store));

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            db_path: db_path.clone(),
            sessions: vec![
                session(AUDITOR, "audrey", "auditor"),
                session(VIEWER, "victor", "viewer"),
                session(MIGRATOR, "mia", "migrator"),
            ],
            audit_default_min_age_days: 90,
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, oracle.clone()).spawn()?;

        Ok(Self {
            _dir: dir,
            db_path,
            oracle,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn seed_audit(db_path: &str) -> Result<()> {
    let mut store = SqliteAuditStore::open(db_path)?;
    let now = console_gate::now_s()? as i64;
    for age_days in [1, 10, 40, 400] {
        store.append(now - age_days * DAY, "INFO", "admin login")?;
    }
    Ok(())
}

fn node<'a>(plan: &'a Value, path: &str) -> &'a Value {
    plan["nodes"]
        .as_array()
        .and_then(|nodes| nodes.iter().find(|n| n["path"] == path))
        .unwrap_or_else(|| panic!("node {path} missing from plan"))
}

#[test]
fn health_is_public_and_not_cacheable() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(api.addr(), "GET", "/health", None, None)?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Pragma: no-cache"));
    assert!(headers.contains("Expires: Mon, 26 Jul 1997 05:00:00 GMT"));
    assert!(body.contains(r#""status":"ok""#));
    Ok(())
}

#[test]
fn missing_or_unknown_token_is_unauthorized() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(api.addr(), "GET", "/pages/audit-settings", None, None)?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("missing_token"));

    let (headers, body) = send(api.addr(), "GET", "/pages/audit-settings", Some("nope"), None)?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("invalid_token"));
    Ok(())
}

#[test]
fn render_plan_shows_denied_form_disabled() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;

    let (headers, body) = send(api.addr(), "GET", "/pages/audit-settings", Some(VIEWER), None)?;
    assert!(headers.contains("200 OK"));
    let plan: Value = serde_json::from_str(&body)?;
    assert_eq!(node(&plan, "title")["visible"], true);
    let form = node(&plan, "auditDeleteForm");
    assert_eq!(form["visible"], true);
    assert_eq!(form["enabled"], false);
    let field = node(&plan, "auditDeleteForm:minAge");
    assert_eq!(field["visible"], true);
    assert_eq!(field["enabled"], false);
    assert_eq!(field["state"], "denied");

    let (_, body) = send(api.addr(), "GET", "/pages/audit-settings", Some(AUDITOR), None)?;
    let plan: Value = serde_json::from_str(&body)?;
    assert_eq!(node(&plan, "auditDeleteForm:delete")["enabled"], true);
    Ok(())
}

#[test]
fn unknown_page_and_wrong_method() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, _) = send(api.addr(), "GET", "/pages/nope", Some(VIEWER), None)?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = send(api.addr(), "GET", "/audit/purge", Some(AUDITOR), None)?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn purge_without_grant_is_forbidden_and_deletes_nothing() -> Result<()> {
    let api = TestApi::new(seed_audit)?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(VIEWER),
        Some(r#"{"min_age_days":30}"#),
    )?;
    assert!(headers.contains("403 Forbidden"));
    assert_eq!(body, r#"{"error":"unauthorized_action"}"#);
    assert_eq!(SqliteAuditStore::open(&api.db_path)?.count()?, 4);
    Ok(())
}

#[test]
fn purge_validates_age_then_deletes() -> Result<()> {
    let api = TestApi::new(seed_audit)?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(AUDITOR),
        Some(r#"{"minAge":3}"#),
    )?;
    assert!(headers.contains("400 Bad Request"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["error"], "validation_failed");
    assert_eq!(value["feedback"][0]["field"], "minAge");

    let (headers, body) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(AUDITOR),
        Some(r#"{"min_age_days":30}"#),
    )?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["result"]["deleted"], 2);
    assert_eq!(SqliteAuditStore::open(&api.db_path)?.count()?, 2);
    Ok(())
}

#[test]
fn revoked_grant_is_enforced_on_next_request() -> Result<()> {
    let api = TestApi::new(seed_audit)?;
    let (headers, _) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(AUDITOR),
        Some(r#"{"min_age_days":365}"#),
    )?;
    assert!(headers.contains("200 OK"));

    api.oracle.store().revoke(
        &Subject::role("auditor"),
        &Grant::new(OperationKind::DeleteAll, EntityType::AuditRecord),
    )?;
    let (headers, _) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(AUDITOR),
        Some(r#"{"min_age_days":365}"#),
    )?;
    assert!(headers.contains("403 Forbidden"));
    Ok(())
}

#[test]
fn malformed_body_is_bad_request() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/audit/purge",
        Some(AUDITOR),
        Some("{not json"),
    )?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("invalid_request"));
    Ok(())
}

#[test]
fn migration_confirm_rename_and_list() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/policy-migration/confirm",
        Some(MIGRATOR),
        Some(r#"{"label":"first","source_cluster":"gw-east","target_cluster":"gw-west","items":["policy-1"]}"#),
    )?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");
    let value: Value = serde_json::from_str(&body)?;
    let id = value["result"]["id"].as_i64().expect("record id");

    let rename = format!(r#"{{"id":{id},"name":"renamed"}}"#);
    let (headers, _) = send(
        api.addr(),
        "POST",
        "/migrations/rename",
        Some(MIGRATOR),
        Some(&rename),
    )?;
    assert!(headers.contains("200 OK"));

    let (headers, body) = send(api.addr(), "GET", "/migrations", Some(MIGRATOR), None)?;
    assert!(headers.contains("200 OK"));
    let listed: Value = serde_json::from_str(&body)?;
    assert_eq!(listed[0]["name"], "renamed");

    let (headers, _) = send(api.addr(), "GET", "/migrations", Some(VIEWER), None)?;
    assert!(headers.contains("403 Forbidden"));
    Ok(())
}

#[test]
fn confirm_without_items_is_rejected() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/policy-migration/confirm",
        Some(MIGRATOR),
        Some(r#"{"label":"empty","source_cluster":"a","target_cluster":"b","items":[]}"#),
    )?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains(r#""field":"items""#));
    Ok(())
}

#[test]
fn sealed_download_round_trips_through_api() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let (headers, body) = send(
        api.addr(),
        "POST",
        "/policy-migration/download",
        Some(MIGRATOR),
        Some(r#"{"source_cluster":"a","target_cluster":"b","items":["p1"],"password":"pw","confirm":"pw"}"#),
    )?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["result"]["sealed"], true);
    let sealed = hex::decode(value["result"]["data_hex"].as_str().unwrap_or(""))?;
    let clear = open_archive(&sealed, b"pw")?;
    let archive: Value = serde_json::from_slice(&clear)?;
    assert_eq!(archive["exported_by"], "mia");

    let (headers, _) = send(
        api.addr(),
        "POST",
        "/policy-migration/download",
        Some(AUDITOR),
        Some(r#"{"source_cluster":"a","target_cluster":"b","items":["p1"]}"#),
    )?;
    assert!(headers.contains("403 Forbidden"));
    Ok(())
}

#[test]
fn oversized_content_length_is_refused_and_server_keeps_serving() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let mut stream = TcpStream::connect(api.addr())?;
    stream.write_all(
        format!(
            "POST /audit/purge HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer {AUDITOR}\r\nContent-Length: {}\r\n\r\n",
            usize::MAX
        )
        .as_bytes(),
    )?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.contains("413"), "{headers}");
    assert!(body.contains("request_too_large"));

    let (headers, _) = send(api.addr(), "GET", "/health", None, None)?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn denied_principal_gets_forbidden_whatever_the_body() -> Result<()> {
    let api = TestApi::new(seed_audit)?;
    let cases = [
        ("/audit/purge", Some(r#"{"minAge":"x"}"#)),
        ("/audit/purge", None),
        ("/migrations/rename", Some("{not json")),
        ("/policy-migration/confirm", Some(r#"{"items":7}"#)),
        ("/policy-migration/download", None),
    ];
    for (path, body) in cases {
        let (headers, response) = send(api.addr(), "POST", path, Some(VIEWER), body)?;
        assert!(headers.contains("403 Forbidden"), "{path}: {headers}");
        assert_eq!(response, r#"{"error":"unauthorized_action"}"#);
    }
    assert_eq!(SqliteAuditStore::open(&api.db_path)?.count()?, 4);
    Ok(())
}

#[test]
fn purge_without_age_uses_configured_default() -> Result<()> {
    let api = TestApi::new(seed_audit)?;
    let (headers, body) = send(api.addr(), "POST", "/audit/purge", Some(AUDITOR), Some("{}"))?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");
    let value: Value = serde_json::from_str(&body)?;
    // Only the 400 day old record is past the 90 day default.
    assert_eq!(value["result"]["deleted"], 1);
    assert_eq!(SqliteAuditStore::open(&api.db_path)?.count()?, 3);
    Ok(())
}

#[test]
fn record_scoped_grant_authorizes_rename_of_that_record_only() -> Result<()> {
    let api = TestApi::new(|_| Ok(()))?;
    let mut ids = Vec::new();
    for label in ["east", "west"] {
        let confirm = format!(
            r#"{{"label":"{label}","source_cluster":"a","target_cluster":"b","items":["p1"]}}"#
        );
        let (headers, body) = send(
            api.addr(),
            "POST",
            "/policy-migration/confirm",
            Some(MIGRATOR),
            Some(&confirm),
        )?;
        assert!(headers.contains("200 OK"), "{headers}\n{body}");
        let value: Value = serde_json::from_str(&body)?;
        ids.push(value["result"]["id"].as_i64().expect("record id"));
    }

    let store = api.oracle.store();
    store.grant(
        Subject::role("viewer"),
        Grant::new(OperationKind::Read, EntityType::MigrationRecord),
    )?;
    store.grant(
        Subject::role("viewer"),
        Grant::new(OperationKind::Update, EntityType::MigrationRecord).for_entity(&ids[0].to_string()),
    )?;

    let rename = format!(r#"{{"id":{},"name":"victor's"}}"#, ids[0]);
    let (headers, body) = send(api.addr(), "POST", "/migrations/rename", Some(VIEWER), Some(&rename))?;
    assert!(headers.contains("200 OK"), "{headers}\n{body}");
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["result"]["name"], "victor's");

    let rename = format!(r#"{{"id":{},"name":"not mine"}}"#, ids[1]);
    let (headers, _) = send(api.addr(), "POST", "/migrations/rename", Some(VIEWER), Some(&rename))?;
    assert!(headers.contains("403 Forbidden"));
    Ok(())
}
