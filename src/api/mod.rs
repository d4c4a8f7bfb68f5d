use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::actions::audit::{AuditPurgeForm, AuditPurgeRequest, SqliteAuditStore};
use crate::actions::migration::{
    previous_migrations, MigrationRenameForm, RenameRequest, SqliteMigrationRecordStore,
};
use crate::actions::policy_migration::{
    DownloadRequest, MigrationConfirmForm, MigrationDownloadForm, MigrationSelection,
};
use crate::capability::{CapabilityDescriptor, EntityType};
use crate::config::{ConsoleConfig, SessionEntry};
use crate::gate::{is_authorization_failure, PageGate, RequestContext, UNAUTHORIZED_ACTION};
use crate::json::JsonResponse;
use crate::oracle::AuthorizationOracle;
use crate::pages;
use crate::principal::Principal;
use crate::secure::{JsonDataForm, Securable, SubmitOutcome};
use crate::validation::Feedback;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub db_path: String,
    pub sessions: Vec<SessionEntry>,
    pub audit_default_min_age_days: i64,
    pub migration_list_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let console = ConsoleConfig::default();
        Self {
            addr: console.api_addr,
            db_path: console.db_path,
            sessions: Vec::new(),
            audit_default_min_age_days: console.audit_default_min_age_days,
            migration_list_limit: console.migration_list_limit,
        }
    }
}

impl From<&ConsoleConfig> for ApiConfig {
    fn from(cfg: &ConsoleConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            db_path: cfg.db_path.clone(),
            sessions: cfg.sessions.clone(),
            audit_default_min_age_days: cfg.audit_default_min_age_days,
            migration_list_limit: cfg.migration_list_limit,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    oracle: Arc<dyn AuthorizationOracle>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, oracle: Arc<dyn AuthorizationOracle>) -> Self {
        Self { cfg, oracle }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let mut sessions = HashMap::with_capacity(self.cfg.sessions.len());
        for entry in &self.cfg.sessions {
            sessions.insert(entry.token.clone(), entry.to_principal()?);
        }
        let mut state = ConsoleState {
            oracle: self.oracle,
            sessions,
            audit: SqliteAuditStore::open(&self.cfg.db_path)?,
            migrations: SqliteMigrationRecordStore::open(&self.cfg.db_path)?,
            audit_default_min_age_days: self.cfg.audit_default_min_age_days,
            migration_list_limit: self.cfg.migration_list_limit,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &mut state, shutdown_thread) {
                log::error!("console api stopped: {}", err);
            }
        });
        log::info!("console api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ConsoleState {
    oracle: Arc<dyn AuthorizationOracle>,
    sessions: HashMap<String, Principal>,
    audit: SqliteAuditStore,
    migrations: SqliteMigrationRecordStore,
    audit_default_min_age_days: i64,
    migration_list_limit: usize,
}

fn run_api(listener: TcpListener, state: &mut ConsoleState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state) {
                    log::warn!("console api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Request body exceeded [`MAX_REQUEST_BYTES`].
#[derive(Debug)]
struct RequestTooLarge;

impl std::fmt::Display for RequestTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request exceeds {} bytes", MAX_REQUEST_BYTES)
    }
}

impl std::error::Error for RequestTooLarge {}

/// Malformed request body.
#[derive(Debug)]
struct InvalidRequest(String);

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid request: {}", self.0)
    }
}

impl std::error::Error for InvalidRequest {}

fn handle_connection(mut stream: TcpStream, state: &mut ConsoleState) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        JsonResponse::error(403, "forbidden").write_to(&mut stream)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) if err.downcast_ref::<RequestTooLarge>().is_some() => {
            JsonResponse::error(413, "request_too_large").write_to(&mut stream)?;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    if request.path == "/health" {
        let response = if request.method == "GET" {
            JsonResponse::from_value(&serde_json::json!({ "status": "ok" }))?
        } else {
            JsonResponse::error(405, "method_not_allowed")
        };
        return response.write_to(&mut stream);
    }

    if request.has_query_token() {
        JsonResponse::error(400, "token_query_param_not_allowed").write_to(&mut stream)?;
        return Ok(());
    }

    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            JsonResponse::error(401, "missing_token").write_to(&mut stream)?;
            return Ok(());
        }
    };
    let principal = match state.sessions.get(&token) {
        Some(principal) => principal.clone(),
        None => {
            JsonResponse::error(401, "invalid_token").write_to(&mut stream)?;
            return Err(anyhow!("unknown session token"));
        }
    };

    let response = match route(state, &request, &principal) {
        Ok(response) => response,
        Err(err) => error_response(&err, &principal),
    };
    response.write_to(&mut stream)
}

fn error_response(err: &anyhow::Error, principal: &Principal) -> JsonResponse {
    if is_authorization_failure(err) {
        log::warn!(
            "{} ({}) refused: {}",
            principal.id(),
            principal.session_ref().unwrap_or("-"),
            err
        );
        return JsonResponse::error(403, &UNAUTHORIZED_ACTION.to_ascii_lowercase());
    }
    if let Some(invalid) = err.downcast_ref::<InvalidRequest>() {
        log::debug!("{}", invalid);
        return JsonResponse::error(400, "invalid_request");
    }
    log::error!("console api request failed for {}: {:#}", principal.id(), err);
    JsonResponse::error(500, "internal_error")
}

fn route(state: &mut ConsoleState, request: &HttpRequest, principal: &Principal) -> Result<JsonResponse> {
    let ctx = RequestContext::new(state.oracle.as_ref(), principal);
    let method = request.method.as_str();
    let path = request.path.as_str();

    if let Some(name) = path.strip_prefix("/pages/") {
        if method != "GET" {
            return Ok(JsonResponse::error(405, "method_not_allowed"));
        }
        return match pages::page_by_name(name)? {
            Some(page) => JsonResponse::from_value(&PageGate::render_pass(&page, ctx)),
            None => Ok(JsonResponse::error(404, "not_found")),
        };
    }

    match (method, path) {
        ("GET", "/migrations") => {
            let page = pages::policy_migration_page()?;
            let limit = state.migration_list_limit;
            let migrations = &state.migrations;
            PageGate::dispatch(&page, pages::PREVIOUS_MIGRATIONS_TARGET, ctx, || {
                let mut form = Securable::new(
                    "previousMigrations",
                    JsonDataForm::new(|ctx| previous_migrations(ctx, migrations, limit)),
                )
                .with_capability(CapabilityDescriptor::attempted_read(
                    EntityType::MigrationRecord,
                    None,
                ));
                match form.submit(ctx, ())? {
                    SubmitOutcome::Accepted { output, .. } => Ok(output),
                    SubmitOutcome::Rejected(feedback) => rejected(feedback),
                }
            })
        }
        // Bodies are parsed only after the pre-dispatch check passes.
        ("POST", "/audit/purge") => {
            let page = pages::audit_settings_page()?;
            let default_days = state.audit_default_min_age_days;
            let audit = &mut state.audit;
            PageGate::dispatch(&page, pages::AUDIT_PURGE_TARGET, ctx, || {
                let mut input: AuditPurgeRequest = parse_body(request)?;
                input.min_age_days.get_or_insert(default_days);
                outcome_response(AuditPurgeForm::secured(audit).submit(ctx, input)?)
            })
        }
        ("POST", "/migrations/rename") => {
            // The record id scopes the edit form's capability. Without a
            // readable id only the unscoped UPDATE_ANY check can apply.
            let input = parse_body::<RenameRequest>(request);
            let page = match &input {
                Ok(input) => pages::policy_migration_page_for_record(input.id)?,
                Err(_) => pages::policy_migration_page()?,
            };
            let migrations = &mut state.migrations;
            PageGate::dispatch(&page, pages::MIGRATION_RENAME_TARGET, ctx, || {
                let input = input?;
                let id = input.id;
                outcome_response(MigrationRenameForm::secured(migrations, id).submit(ctx, input)?)
            })
        }
        ("POST", "/policy-migration/confirm") => {
            let page = pages::policy_migration_page()?;
            let migrations = &mut state.migrations;
            PageGate::dispatch(&page, pages::MIGRATION_CONFIRM_TARGET, ctx, || {
                let input: MigrationSelection = parse_body(request)?;
                outcome_response(MigrationConfirmForm::secured(migrations).submit(ctx, input)?)
            })
        }
        ("POST", "/policy-migration/download") => {
            let page = pages::policy_migration_page()?;
            PageGate::dispatch(&page, pages::MIGRATION_DOWNLOAD_TARGET, ctx, || {
                let DownloadBody {
                    selection,
                    credentials,
                } = parse_body(request)?;
                outcome_response(MigrationDownloadForm::secured(selection).submit(ctx, credentials)?)
            })
        }
        (_, "/migrations")
        | (_, "/audit/purge")
        | (_, "/migrations/rename")
        | (_, "/policy-migration/confirm")
        | (_, "/policy-migration/download") => Ok(JsonResponse::error(405, "method_not_allowed")),
        _ => Ok(JsonResponse::error(404, "not_found")),
    }
}

#[derive(Deserialize)]
struct DownloadBody {
    #[serde(flatten)]
    selection: MigrationSelection,
    #[serde(flatten)]
    credentials: DownloadRequest,
}

#[derive(Serialize)]
struct Accepted<'a, T> {
    result: &'a T,
    feedback: &'a Feedback,
}

#[derive(Serialize)]
struct Rejected<'a> {
    error: &'static str,
    feedback: &'a Feedback,
}

fn rejected(feedback: Feedback) -> Result<JsonResponse> {
    JsonResponse::with_status(
        400,
        &Rejected {
            error: "validation_failed",
            feedback: &feedback,
        },
    )
}

fn outcome_response<T: Serialize>(outcome: SubmitOutcome<T>) -> Result<JsonResponse> {
    match outcome {
        SubmitOutcome::Accepted { output, feedback } => JsonResponse::from_value(&Accepted {
            result: &output,
            feedback: &feedback,
        }),
        SubmitOutcome::Rejected(feedback) => rejected(feedback),
    }
}

fn parse_body<T: DeserializeOwned>(request: &HttpRequest) -> Result<T> {
    if request.body.is_empty() {
        return Err(InvalidRequest("empty body".to_string()).into());
    }
    serde_json::from_slice(&request.body).map_err(|e| InvalidRequest(e.to_string()).into())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(RequestTooLarge.into());
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_REQUEST_BYTES.saturating_sub(header_end) {
        return Err(RequestTooLarge.into());
    }
    let mut body = data.get(header_end..).unwrap_or_default().to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("request body truncated"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body,
    })
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn has_query_token(&self) -> bool {
        if let Some(query) = self.raw_path.split('?').nth(1) {
            for pair in query.split('&') {
                if let Some((k, _)) = pair.split_once('=') {
                    if k == "token" {
                        return true;
                    }
                }
            }
        }
        false
    }
}
