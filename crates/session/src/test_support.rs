// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders and a programmable mock
//! backend.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::session::Session;
use crate::token::epoch_secs;

/// Unsigned compact JWT carrying `claims`.
pub fn jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// JWT for user `u-1` expiring `secs` from now.
pub fn token_expiring_in(secs: u64) -> String {
    jwt(json!({ "sub": "u-1", "exp": epoch_secs() + secs }))
}

/// Like [`token_expiring_in`] with a distinguishing `jti`, so two tokens with
/// the same expiry differ.
pub fn named_token(name: &str, secs: u64) -> String {
    jwt(json!({ "sub": "u-1", "exp": epoch_secs() + secs, "jti": name }))
}

/// One programmed response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    body: Value,
    headers: Vec<(String, String)>,
    delay: Duration,
    require_bearer: Option<String>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, body, headers: vec![], delay: Duration::ZERO, require_bearer: None }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn expired() -> Self {
        Self::json(401, json!({ "code": "TOKEN_EXPIRED", "message": "Access token expired" }))
    }

    pub fn invalid() -> Self {
        Self::json(401, json!({ "code": "TOKEN_INVALID", "message": "Invalid token" }))
    }

    /// Token set as `/auth/refresh` and the sign-in endpoints return it.
    pub fn tokens(access_token: &str, csrf_token: &str) -> Self {
        Self::ok(json!({ "accessToken": access_token, "csrfToken": csrf_token }))
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Only answer this way for `Authorization: Bearer <token>`; any other
    /// caller gets an expired-token 401.
    pub fn require_bearer(mut self, token: &str) -> Self {
        self.require_bearer = Some(token.to_owned());
        self
    }
}

/// A request the mock backend received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.header(AUTHORIZATION.as_str())?.strip_prefix("Bearer ")
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct MockState {
    /// Per-path queue; the last entry repeats.
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn next_reply(&self, path: &str) -> Option<Reply> {
        let mut replies = self.replies.lock();
        let queue = replies.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Axum server on `127.0.0.1:0` answering from programmed [`Reply`]s and
/// recording every request. Unprogrammed paths answer 404.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let router = Router::new().fallback(mock_handler).with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
        });
        Ok(Self { addr, state, shutdown })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer `path` with `reply` from now on.
    pub fn on(&self, path: &str, reply: Reply) -> &Self {
        self.on_sequence(path, vec![reply])
    }

    /// Answer `path` with `replies` in order, repeating the last.
    pub fn on_sequence(&self, path: &str, replies: Vec<Reply>) -> &Self {
        self.state.replies.lock().insert(path.to_owned(), replies.into());
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.log.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state.log.lock().iter().filter(|r| r.path == path).cloned().collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.state.log.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.log.lock().len()
    }

    /// Config pointing at this backend.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.url())
    }

    /// In-memory session against this backend.
    pub fn session(&self) -> anyhow::Result<Session> {
        Session::in_memory(self.config())
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn mock_handler(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_owned();
    state.log.lock().push(RecordedRequest {
        method,
        path: path.clone(),
        query: uri.query().map(str::to_owned),
        headers: headers.clone(),
        body,
    });

    let Some(reply) = state.next_reply(&path) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "code": "NOT_FOUND", "message": path })))
            .into_response();
    };
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    if let Some(ref token) = reply.require_bearer {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(token.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "code": "TOKEN_EXPIRED", "message": "Access token expired" })),
            )
                .into_response();
        }
    }

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(reply.body)).into_response();
    for (name, value) in &reply.headers {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        {
            response.headers_mut().append(name, value);
        }
    }
    response
}
