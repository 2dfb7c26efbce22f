//! In-process mock identity provider for tests
//!
//! Serves discovery, device authorization and token endpoints on an ephemeral
//! loopback port. Behaviour is switched at runtime through `MockIdp` setters
//! and every endpoint counts its requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::constants::DEVICE_CODE_GRANT_TYPE;
use crate::options::ConnectOptions;
use crate::token::now_secs;

/// Device code handed out by the mock.
pub const DEVICE_CODE: &str = "abc";
/// User code handed out by the mock.
pub const USER_CODE: &str = "123";

/// What the token endpoint answers to device code polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollScenario {
    /// `authorization_pending` this many times, then tokens.
    Success { pending_polls: usize },
    /// `authorization_pending` forever.
    Pending,
    /// `not_authorized` with a description on the first poll.
    Deny,
    /// `slow_down` once, then tokens.
    SlowDown,
}

/// Requests received, per endpoint.
#[derive(Debug, Default)]
pub struct Counters {
    pub discovery: AtomicUsize,
    pub device_code: AtomicUsize,
    pub token_polls: AtomicUsize,
    pub refresh: AtomicUsize,
}

impl Counters {
    /// Full device flows started (device code requests).
    pub fn device_flows(&self) -> usize {
        self.device_code.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Behavior {
    discovery_status: u16,
    omit_device_endpoint: bool,
    device_code_status: u16,
    expires_in: u64,
    interval: u64,
    poll: PollScenario,
    polls_since_code: usize,
    token_ttl: i64,
    refresh_ttl: i64,
    issue_refresh_token: bool,
    rotate_refresh_token: bool,
    refresh_status: u16,
    omit_bearer_tokens: bool,
    issued: u64,
    device_code_forms: Vec<HashMap<String, String>>,
    token_forms: Vec<HashMap<String, String>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            discovery_status: 200,
            omit_device_endpoint: false,
            device_code_status: 200,
            expires_in: 10,
            interval: 1,
            poll: PollScenario::Success { pending_polls: 0 },
            polls_since_code: 0,
            token_ttl: 3600,
            refresh_ttl: 7200,
            issue_refresh_token: true,
            rotate_refresh_token: true,
            refresh_status: 200,
            omit_bearer_tokens: false,
            issued: 0,
            device_code_forms: Vec::new(),
            token_forms: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    base: String,
    counters: Arc<Counters>,
    behavior: Arc<Mutex<Behavior>>,
}

impl AppState {
    fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Running mock identity provider. The server stops when this is dropped.
pub struct MockIdp {
    addr: SocketAddr,
    pub counters: Arc<Counters>,
    behavior: Arc<Mutex<Behavior>>,
    task: JoinHandle<()>,
}

impl MockIdp {
    /// Start on `127.0.0.1:0` with the default scenario: immediate approval,
    /// one hour tokens with a refresh token.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("mock idp bind failed: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("mock idp address unavailable: {e}"));

        let counters = Arc::new(Counters::default());
        let behavior = Arc::new(Mutex::new(Behavior::default()));
        let state = AppState {
            base: format!("http://{addr}"),
            counters: counters.clone(),
            behavior: behavior.clone(),
        };

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/devicecode", post(device_code))
            .route("/token", post(token))
            .with_state(state);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            counters,
            behavior,
            task,
        }
    }

    pub fn issuer(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.issuer())
    }

    /// Connect options pointing at this provider with silent presentation.
    pub fn options(&self) -> ConnectOptions {
        ConnectOptions::from([
            (crate::constants::OPT_ISSUER, self.issuer()),
            (crate::constants::OPT_CLIENT_ID, "test-client".to_string()),
            (crate::constants::OPT_NO_BROWSER, "true".to_string()),
            (crate::constants::OPT_QUIET, "true".to_string()),
        ])
    }

    fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_discovery_status(&self, status: u16) {
        self.behavior().discovery_status = status;
    }

    pub fn omit_device_endpoint(&self) {
        self.behavior().omit_device_endpoint = true;
    }

    /// Answer device code requests with 400, as providers do when the
    /// administrator disabled the grant.
    pub fn disable_device_flow(&self) {
        self.behavior().device_code_status = 400;
    }

    pub fn set_device_code_status(&self, status: u16) {
        self.behavior().device_code_status = status;
    }

    pub fn set_poll_scenario(&self, scenario: PollScenario) {
        self.behavior().poll = scenario;
    }

    /// Device code lifetime and polling interval, in seconds.
    pub fn set_timing(&self, expires_in: u64, interval: u64) {
        let mut behavior = self.behavior();
        behavior.expires_in = expires_in;
        behavior.interval = interval;
    }

    /// Lifetime of tokens issued by the device flow. Negative values issue
    /// tokens that are already expired.
    pub fn set_token_ttl(&self, seconds: i64) {
        self.behavior().token_ttl = seconds;
    }

    /// Lifetime of tokens issued by a refresh.
    pub fn set_refresh_ttl(&self, seconds: i64) {
        self.behavior().refresh_ttl = seconds;
    }

    pub fn without_refresh_token(&self) {
        self.behavior().issue_refresh_token = false;
    }

    /// Refresh responses omit `refresh_token`.
    pub fn keep_refresh_token(&self) {
        self.behavior().rotate_refresh_token = false;
    }

    pub fn fail_refresh(&self) {
        self.behavior().refresh_status = 400;
    }

    /// Successful token responses carry neither `id_token` nor `access_token`.
    pub fn omit_bearer_tokens(&self) {
        self.behavior().omit_bearer_tokens = true;
    }

    /// Forms received by the device authorization endpoint, in order.
    pub fn device_code_forms(&self) -> Vec<HashMap<String, String>> {
        self.behavior().device_code_forms.clone()
    }

    /// Forms received by the token endpoint, in order.
    pub fn token_forms(&self) -> Vec<HashMap<String, String>> {
        self.behavior().token_forms.clone()
    }
}

impl Drop for MockIdp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Unsigned JWT-shaped token whose payload carries `exp` and `claims`.
pub fn make_jwt(exp: u64, claims: serde_json::Value) -> String {
    let mut payload = json!({ "exp": exp });
    if let (Some(target), Some(extra)) = (payload.as_object_mut(), claims.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    format!(
        "header.{}.signature",
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

fn expiry_in(ttl: i64) -> u64 {
    now_secs().saturating_add_signed(ttl)
}

fn oauth_error(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    let mut body = json!({ "error": error });
    if let Some(description) = description {
        body["error_description"] = json!(description);
    }
    (status, Json(body)).into_response()
}

fn issue_tokens(behavior: &mut Behavior, ttl: i64, with_refresh: bool) -> Response {
    behavior.issued += 1;
    let n = behavior.issued;
    let exp = expiry_in(ttl);
    let mut body = json!({
        "token_type": "Bearer",
        "expires_in": ttl.max(0),
    });
    if !behavior.omit_bearer_tokens {
        body["id_token"] = json!(make_jwt(exp, json!({ "kind": "id", "n": n })));
        body["access_token"] = json!(make_jwt(exp, json!({ "kind": "access", "n": n })));
    }
    if with_refresh {
        body["refresh_token"] = json!(format!("refresh-{n}"));
    }
    (StatusCode::OK, Json(body)).into_response()
}

async fn discovery(State(state): State<AppState>) -> Response {
    state.counters.discovery.fetch_add(1, Ordering::SeqCst);
    let behavior = state.behavior();
    let status =
        StatusCode::from_u16(behavior.discovery_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status != StatusCode::OK {
        return (status, "unavailable").into_response();
    }
    let mut body = json!({
        "issuer": state.base,
        "token_endpoint": format!("{}/token", state.base),
    });
    if !behavior.omit_device_endpoint {
        body["device_authorization_endpoint"] = json!(format!("{}/devicecode", state.base));
    }
    (StatusCode::OK, Json(body)).into_response()
}

async fn device_code(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.counters.device_code.fetch_add(1, Ordering::SeqCst);
    let mut behavior = state.behavior();
    behavior.device_code_forms.push(form);
    behavior.polls_since_code = 0;

    let status =
        StatusCode::from_u16(behavior.device_code_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status != StatusCode::OK {
        return oauth_error(status, "unauthorized_client", Some("device flow is disabled"));
    }
    let body = json!({
        "device_code": DEVICE_CODE,
        "user_code": USER_CODE,
        "verification_uri": format!("{}/device", state.base),
        "verification_uri_complete": format!("{}/device?user_code={USER_CODE}", state.base),
        "expires_in": behavior.expires_in,
        "interval": behavior.interval,
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn token(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let grant_type = form.get("grant_type").cloned().unwrap_or_default();
    let mut behavior = state.behavior();
    behavior.token_forms.push(form);

    if grant_type == DEVICE_CODE_GRANT_TYPE {
        state.counters.token_polls.fetch_add(1, Ordering::SeqCst);
        behavior.polls_since_code += 1;
        let polls = behavior.polls_since_code;
        let with_refresh = behavior.issue_refresh_token;
        let ttl = behavior.token_ttl;
        let scenario = behavior.poll;
        match scenario {
            PollScenario::Success { pending_polls } if polls > pending_polls => {
                issue_tokens(&mut behavior, ttl, with_refresh)
            }
            PollScenario::Success { .. } | PollScenario::Pending => {
                oauth_error(StatusCode::BAD_REQUEST, "authorization_pending", None)
            }
            PollScenario::Deny => oauth_error(
                StatusCode::BAD_REQUEST,
                "not_authorized",
                Some("a descriptive error"),
            ),
            PollScenario::SlowDown if polls == 1 => {
                oauth_error(StatusCode::BAD_REQUEST, "slow_down", None)
            }
            PollScenario::SlowDown => issue_tokens(&mut behavior, ttl, with_refresh),
        }
    } else if grant_type == "refresh_token" {
        state.counters.refresh.fetch_add(1, Ordering::SeqCst);
        if behavior.refresh_status != 200 {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                Some("refresh token revoked"),
            );
        }
        let ttl = behavior.refresh_ttl;
        let rotate = behavior.rotate_refresh_token;
        issue_tokens(&mut behavior, ttl, rotate)
    } else {
        oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", None)
    }
}
