// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client with the request/response interceptor pair.
//!
//! [`HttpTransport`] is the request stage: it attaches the bearer token, the
//! CSRF header (refresh and logout only) and the location header, then turns
//! the response into an [`ApiResponse`] or a classified [`ApiError`].
//! [`ApiClient`] is the response stage: an expired-token 401 triggers one
//! coordinated refresh and one replay.

use std::sync::{Arc, Once};

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::bridge::StorageBridge;
use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorBody, TokenFailure, UnauthorizedClassifier};
use crate::refresh::RefreshCoordinator;
use crate::store::CredentialStore;

pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const LOCATION_HEADER: &str = "x-location-id";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Only the first call
/// has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A replayable description of one backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, retried: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?);
        Ok(self)
    }

    /// Refresh and logout: never refreshed-and-replayed, and the only calls
    /// that carry the CSRF header.
    pub fn is_auth_lifecycle(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        path == REFRESH_PATH || path == LOGOUT_PATH
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    fn into_retry(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// A successful (2xx) backend response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    /// Deserialize the body; an empty body reads as JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = if self.body.trim().is_empty() { "null" } else { self.body.as_str() };
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Request stage plus response classification.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    store: Arc<CredentialStore>,
    bridge: Arc<StorageBridge>,
    classifier: UnauthorizedClassifier,
}

impl HttpTransport {
    pub fn new(
        config: &SessionConfig,
        store: Arc<CredentialStore>,
        bridge: Arc<StorageBridge>,
    ) -> anyhow::Result<Self> {
        ensure_crypto();
        let base_url = Url::parse(&config.api_url)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .cookie_provider(Arc::clone(bridge.jar()))
            .build()?;
        let classifier = UnauthorizedClassifier::new(&config.expired_header_pattern)?;
        Ok(Self { http, base_url, store, bridge, classifier })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn bridge(&self) -> &Arc<StorageBridge> {
        &self.bridge
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| ApiError::Transport(format!("bad path {path}: {e}")))
    }

    /// Send using whatever access token the store currently holds.
    pub async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.execute_with(req, None).await
    }

    /// Send with `token` overriding the stored access token.
    pub async fn execute_with(
        &self,
        req: &ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self.http.request(req.method.clone(), self.url(&req.path)?);

        let stored = if token.is_none() { self.store.access_token() } else { None };
        if let Some(token) = token.or(stored.as_deref()) {
            builder = builder.bearer_auth(token);
        }
        if req.is_auth_lifecycle() {
            if let Some(csrf) = self.store.csrf_token().or_else(|| self.bridge.csrf_cookie()) {
                builder = builder.header(CSRF_HEADER, csrf);
            }
        }
        if let Some(location) = self.bridge.location_id() {
            builder = builder.header(LOCATION_HEADER, location);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await?;

        if status.is_success() {
            return Ok(ApiResponse { status: status.as_u16(), headers, body });
        }

        let error = ErrorBody::parse(&body);
        let message = error.message().map(str::to_owned).unwrap_or_else(|| body.clone());
        if status == StatusCode::UNAUTHORIZED {
            let failure = self.classifier.classify(&headers, &error);
            return Err(ApiError::Unauthorized { failure, message });
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            code: error.code().map(str::to_owned),
            message,
        })
    }
}

/// Response stage: refresh-and-replay on expired tokens, bounded to one
/// replay per request.
pub struct ApiClient {
    transport: Arc<HttpTransport>,
    refresher: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub fn new(transport: Arc<HttpTransport>, refresher: Arc<RefreshCoordinator>) -> Self {
        Self { transport, refresher }
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    pub async fn send(&self, req: ApiRequest) -> Result<ApiResponse, ApiError> {
        let store = self.transport.store();
        let generation = store.generation();
        let sent = store.access_token();
        match self.transport.execute_with(&req, sent.as_deref()).await {
            Err(e @ ApiError::Unauthorized { failure: TokenFailure::Expired, .. })
                if !req.is_auth_lifecycle() && !req.is_retried() =>
            {
                // The session this request was sent under has been cleared.
                if store.generation() != generation {
                    debug!(path = %req.path, "session ended while request was in flight");
                    return Err(e);
                }
                // A refresh that settled while this request was in the air
                // already produced a newer token.
                let token = match store.access_token() {
                    Some(current) if sent.as_ref() != Some(&current) => {
                        debug!(path = %req.path, "token rotated in flight, replaying");
                        current
                    }
                    _ => {
                        debug!(path = %req.path, "access token expired, refreshing before replay");
                        self.refresher.ensure_refresh().await?
                    }
                };
                let replay = req.into_retry();
                self.transport.execute_with(&replay, Some(&token)).await
            }
            other => other,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
