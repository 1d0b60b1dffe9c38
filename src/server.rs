//!
//! gatehouse demo server
//! ---------------------
//! Axum deployment of the verification gate: a container-style
//! authenticator establishes the per-request subject, the gate middleware
//! verifies it, and a small greeting endpoint reads the ambient identity.
//!
//! Responsibilities:
//! - Session management with an opaque cookie token model, including the
//!   fixation-guard rotation on first reuse.
//! - HTTP Basic first contact backed by the configured credential table.
//! - The verification gate in front of every non-public route.
//! - Public-path rule table (exact paths or `/prefix/*`).
//! - Periodic sweep of expired sessions.

use std::{collections::HashMap, sync::Arc};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Extension, Json, Router};
use base64::Engine;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::GateError;
use crate::gate::{self, GatePolicy};
use crate::session::{SessionManager, SessionRecord};
use crate::subject::Subject;

const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;

/// Declarative table of request paths that bypass the authenticator and the
/// gate. An entry is an exact path, or a prefix pattern ending in `/*`.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    public: Vec<String>,
}

impl AccessRules {
    pub fn new(public: Vec<String>) -> Self {
        Self { public }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public.iter().any(|rule| match rule.strip_suffix("/*") {
            Some(prefix) => {
                path == prefix
                    || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
            }
            None => path == rule,
        })
    }
}

/// Shared server state handed to the middleware stack.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<HashMap<String, String>>,
    pub sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    pub manager: SessionManager,
    pub cookie_name: String,
    pub policy: GatePolicy,
    pub rules: AccessRules,
}

impl AppState {
    pub fn new(cfg: &ServerConfig) -> Self {
        Self {
            users: Arc::new(cfg.users.clone()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            manager: SessionManager { ttl: cfg.session_ttl, fixation_guard: cfg.fixation_guard },
            cookie_name: cfg.cookie_name.clone(),
            policy: cfg.policy,
            rules: AccessRules::new(cfg.public_paths.clone()),
        }
    }

    /// Advance a presented session token through its lifecycle: expired
    /// records are dropped, and a first reuse under the fixation guard is
    /// re-keyed. Returns the live record and whether this call rotated it;
    /// `None` means the token no longer names a usable session.
    ///
    /// Expiry and rotation commit under the write lock only after
    /// re-checking the record there, so two reuses racing on one token
    /// cannot both rotate it; the loser sees the superseded token as gone.
    async fn resolve_session(&self, token: &str) -> Option<(SessionRecord, bool)> {
        let peeked = { self.sessions.read().await.get(token).cloned() }?;
        if self.manager.is_live(&peeked) && !self.manager.needs_rotation(&peeked) {
            return Some((peeked, false));
        }

        let mut sessions = self.sessions.write().await;
        let current = sessions.get(token).cloned()?;
        if !self.manager.is_live(&current) {
            sessions.remove(token);
            debug!(user = %current.name, "expired session presented");
            return None;
        }
        if self.manager.needs_rotation(&current) {
            let rotated = self.manager.rotate(&current);
            sessions.remove(token);
            sessions.insert(rotated.token.clone(), rotated.clone());
            info!(user = %rotated.name, "session token rotated by fixation guard");
            return Some((rotated, true));
        }
        Some((current, false))
    }
}

/// Extract a cookie value by name from a request's Cookie header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        if let Some((k, v)) = part.trim().split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Decode `Authorization: Basic <base64(user:pass)>` into its parts.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Build the session Set-Cookie header. No Secure attribute: the demo runs
/// over plain HTTP and the harness's cookie store would otherwise refuse to
/// send the token back.
fn session_cookie(name: &str, token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Path=/", name, token))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn challenge() -> Response {
    let mut res =
        (StatusCode::UNAUTHORIZED, Json(json!({ "status": "unauthorized" }))).into_response();
    res.headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"gatehouse\""));
    res
}

/// Container-style authenticator. Establishes the per-request [`Subject`]
/// before the gate runs, from either a live session cookie or HTTP Basic
/// credentials, and issues (or rotates) the session cookie on the way out.
/// Requests that authenticate neither way get the Basic challenge.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if state.rules.is_public(req.uri().path()) {
        return next.run(req).await;
    }

    if let Some(token) = cookie_value(req.headers(), &state.cookie_name) {
        // Stale or superseded tokens fall through to credentials.
        if let Some((record, rotated)) = state.resolve_session(&token).await {
            req.extensions_mut().insert(Subject::for_authenticated_user(&record.name));
            let mut res = next.run(req).await;
            if rotated {
                res.headers_mut().append(
                    header::SET_COOKIE,
                    session_cookie(&state.cookie_name, &record.token),
                );
            }
            return res;
        }
    }

    if let Some((user, pass)) = basic_credentials(req.headers()) {
        if state.users.get(&user).map(|expected| expected == &pass).unwrap_or(false) {
            let record = state.manager.issue(&user);
            state.sessions.write().await.insert(record.token.clone(), record.clone());
            info!(user = %user, "session issued");
            req.extensions_mut().insert(Subject::for_authenticated_user(&user));
            let mut res = next.run(req).await;
            res.headers_mut()
                .append(header::SET_COOKIE, session_cookie(&state.cookie_name, &record.token));
            return res;
        }
        warn!(user = %user, "rejected basic credentials");
    }

    challenge()
}

/// The verification gate. Runs after the authenticator on every non-public
/// route and refuses the request when the expected application identity did
/// not survive into the subject.
pub async fn verify_gate(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.rules.is_public(req.uri().path()) {
        return next.run(req).await;
    }
    match gate::verify(state.policy, req.extensions().get::<Subject>()) {
        Ok(()) => next.run(req).await,
        Err(err) => {
            match &err {
                GateError::Configuration { .. } => {
                    tracing::error!(%err, "verification gate misconfigured")
                }
                _ => warn!(%err, "request rejected by verification gate"),
            }
            gate_reject(&err)
        }
    }
}

/// Render a gate rejection in the standard error envelope.
fn gate_reject(err: &GateError) -> Response {
    let status = StatusCode::from_u16(err.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "status": "error", "error": err }))).into_response()
}

fn missing_identity() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "error": "no identity in request context" })),
    )
        .into_response()
}

/// The demo business endpoint: greets the caller by the name resolved from
/// the ambient subject. Reaching this without a usable identity means the
/// middleware stack is mis-assembled, reported as a server-side error.
async fn hello(subject: Option<Extension<Subject>>) -> Response {
    let Some(Extension(subject)) = subject else {
        return missing_identity();
    };
    match gate::application_name(&subject) {
        Some(name) => format!("Greetings, {}", name).into_response(),
        None => missing_identity(),
    }
}

/// Assemble the demo application. Layer order matters: the authenticator
/// must populate the subject before the gate reads it, so it is the
/// outermost layer.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "gatehouse ok" }))
        .route("/hello", get(hello))
        .layer(middleware::from_fn_with_state(state.clone(), verify_gate))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

/// Drop expired sessions so the map does not grow without bound under
/// credential-per-request traffic.
async fn sweep_sessions(state: AppState) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut sessions = state.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| state.manager.is_live(record));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "session_sweep");
        }
    }
}

/// Start the demo server on the configured address and serve until the
/// process stops.
pub async fn run_with_config(cfg: &ServerConfig) -> anyhow::Result<()> {
    let state = AppState::new(cfg);
    tokio::spawn(sweep_sessions(state.clone()));
    let router = app(state);
    info!(addr = %cfg.addr, policy = ?cfg.policy, "gatehouse server starting");
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Convenience entry point using environment-derived configuration.
pub async fn run() -> anyhow::Result<()> {
    let cfg = ServerConfig::from_env()?;
    run_with_config(&cfg).await
}
