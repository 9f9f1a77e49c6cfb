use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::debug;

/// In-memory content backend used by the integration tests: a login
/// endpoint issuing tokens, current- and legacy-shaped search endpoints
/// guarded by the token, a proxy health endpoint, and a handful of
/// pathological endpoints (oversized, slow, redirecting).
pub struct MockBackendState {
    logins: AtomicU64,
    searches: AtomicU64,
    health_probes: AtomicU64,
    valid_token: RwLock<Option<String>>,
    issued_tokens: AtomicU64,
    /// When set, the login endpoint answers with this raw body instead of
    /// issuing a token.
    login_body_override: RwLock<Option<String>>,
    /// When set, every search answers with this raw body.
    search_body_override: RwLock<Option<String>>,
    /// Search responses always carry the expired-session marker, even with
    /// a fresh token.
    always_expired: AtomicBool,
    /// Delay applied to search responses.
    search_delay: RwLock<Option<Duration>>,
    results: Vec<Value>,
}

impl MockBackendState {
    pub fn new() -> Self {
        Self::with_results(vec![json!({"name": "alpha"}), json!({"name": "beta"})])
    }

    pub fn with_results(results: Vec<Value>) -> Self {
        Self {
            logins: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            health_probes: AtomicU64::new(0),
            valid_token: RwLock::new(None),
            issued_tokens: AtomicU64::new(0),
            login_body_override: RwLock::new(None),
            search_body_override: RwLock::new(None),
            always_expired: AtomicBool::new(false),
            search_delay: RwLock::new(None),
            results,
        }
    }

    pub fn received_logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn received_searches(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn received_health_probes(&self) -> u64 {
        self.health_probes.load(Ordering::Relaxed)
    }

    /// Pretend an earlier session exists and is still valid.
    pub fn seed_token(&self, token: &str) {
        *self.valid_token.write() = Some(token.to_string());
    }

    pub fn set_login_body_override(&self, body: Option<String>) {
        *self.login_body_override.write() = body;
    }

    pub fn set_search_body_override(&self, body: Option<String>) {
        *self.search_body_override.write() = body;
    }

    pub fn set_always_expired(&self, value: bool) {
        self.always_expired.store(value, Ordering::Relaxed);
    }

    pub fn set_search_delay(&self, delay: Option<Duration>) {
        *self.search_delay.write() = delay;
    }
}

impl Default for MockBackendState {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds an ephemeral port, serves the mock app on it, and returns the
/// bound address.
pub async fn start_mock_backend(state: Arc<MockBackendState>) -> eyre::Result<SocketAddr> {
    let app = mock_backend_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    debug!(%addr, "mock backend listening");
    Ok(addr)
}

fn mock_backend_router(state: Arc<MockBackendState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(handle_login))
        .route("/api/admin/login", post(handle_login))
        .route("/api/fs/search", post(handle_search_current))
        .route("/api/public/search", post(handle_search_legacy))
        .route("/proxy", get(handle_proxy))
        .route("/big", get(handle_big))
        .route("/slow/{ms}", get(handle_slow))
        .route("/redirect", get(handle_redirect))
        .route("/dest", get(handle_dest))
        .with_state(state)
}

async fn handle_login(State(state): State<Arc<MockBackendState>>) -> impl IntoResponse {
    state.logins.fetch_add(1, Ordering::Relaxed);
    if let Some(body) = state.login_body_override.read().clone() {
        return (StatusCode::OK, body);
    }
    let n = state.issued_tokens.fetch_add(1, Ordering::Relaxed) + 1;
    let token = format!("tok-{n}");
    state.seed_token(&token);
    (StatusCode::OK, json!({"code": 200, "data": {"token": token}}).to_string())
}

async fn handle_search_current(
    State(state): State<Arc<MockBackendState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    search_response(&state, &headers, true).await
}

async fn handle_search_legacy(
    State(state): State<Arc<MockBackendState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    search_response(&state, &headers, false).await
}

async fn search_response(
    state: &MockBackendState,
    headers: &HeaderMap,
    current: bool,
) -> (StatusCode, String) {
    state.searches.fetch_add(1, Ordering::Relaxed);
    let delay = *state.search_delay.read();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(body) = state.search_body_override.read().clone() {
        return (StatusCode::OK, body);
    }

    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|token| state.valid_token.read().as_deref() == Some(token));
    if !authorized || state.always_expired.load(Ordering::Relaxed) {
        return (StatusCode::OK, json!({"code": 401, "message": "Guest user is disabled"}).to_string());
    }

    let body = if current {
        json!({"code": 200, "data": {"content": state.results}})
    } else {
        json!({"code": 200, "data": state.results})
    };
    (StatusCode::OK, body.to_string())
}

async fn handle_proxy(
    State(state): State<Arc<MockBackendState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.health_probes.fetch_add(1, Ordering::Relaxed);
    if params.get("do").map(String::as_str) == Some("ck") {
        (StatusCode::OK, "ok".to_string())
    } else {
        (StatusCode::NOT_FOUND, String::new())
    }
}

async fn handle_big() -> impl IntoResponse {
    // fixed body, so Content-Length advertises 2048 bytes
    (StatusCode::OK, vec![b'x'; 2048])
}

async fn handle_slow(Path(ms): Path<u64>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    (StatusCode::OK, "done".to_string())
}

async fn handle_redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [("Location", "/dest")], String::new())
}

async fn handle_dest() -> impl IntoResponse {
    (StatusCode::OK, "destination".to_string())
}
