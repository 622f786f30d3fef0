// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! The first caller starts the backend call on its own task; everyone who
//! arrives before it settles subscribes to the same completion channel. The
//! channel always receives exactly one outcome, so every waiter observes the
//! same token or the same error.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{NativeRefreshRequest, TokenPayload};
use crate::client::{ApiRequest, HttpTransport, REFRESH_PATH};
use crate::error::{ApiError, RefreshError};
use crate::scheduler::RefreshTrigger;
use crate::store::SessionStatus;
use crate::token::decode_claims;

type Outcome = Option<Result<String, RefreshError>>;

/// Collapses concurrent refresh requests into one backend call.
pub struct RefreshCoordinator {
    transport: Arc<HttpTransport>,
    native: bool,
    inflight: Mutex<Option<watch::Receiver<Outcome>>>,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<HttpTransport>, native: bool) -> Self {
        Self { transport, native, inflight: Mutex::new(None) }
    }

    /// Obtain a fresh access token, joining an in-flight refresh if there is
    /// one.
    ///
    /// The backend call runs on a spawned task and completes even if every
    /// caller is dropped.
    pub async fn ensure_refresh(self: &Arc<Self>) -> Result<String, RefreshError> {
        let mut rx = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                // A closed channel means the refresh task died; start over.
                Some(rx) if rx.has_changed().is_ok() => {
                    debug!("refresh in flight, joining");
                    rx.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx.clone());
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = this.refresh_once().await;
                        // Clear before publishing: a caller arriving after
                        // settlement must start a new refresh.
                        let mut inflight = this.inflight.lock();
                        *inflight = None;
                        tx.send_replace(Some(outcome));
                    });
                    rx
                }
            }
        };

        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| RefreshError::Transport("refresh task ended without an outcome".into()))?;
        settled.unwrap_or_else(|| Err(RefreshError::Transport("refresh outcome missing".into())))
    }

    /// Whether a refresh is currently in flight.
    pub fn in_flight(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// Write an issued credential set into the store and mark the session
    /// authenticated. Returns the new access token, or `None` when the store
    /// was cleared after `generation` was read (nothing is written then).
    ///
    /// A user record in the payload wins; otherwise a stub is built from the
    /// token claims unless the store already holds a user with the same id.
    pub fn apply_tokens(&self, generation: u64, payload: TokenPayload) -> Option<String> {
        let store = self.transport.store();
        let bridge = self.transport.bridge();

        let csrf = payload.csrf_token.or_else(|| bridge.csrf_cookie());
        let issued_user = payload.user;
        let claims = decode_claims(&payload.access_token);
        let issued = store.issue(generation, payload.access_token.clone(), csrf, |held| {
            if issued_user.is_some() {
                return issued_user;
            }
            let subject = claims.as_ref().and_then(|c| c.sub.as_deref());
            match held {
                Some(user) if Some(user.id.as_str()) == subject => Some(user),
                _ => claims.as_ref().and_then(|c| c.user_stub()),
            }
        });
        if !issued {
            return None;
        }

        if self.native {
            if let Some(ref rotated) = payload.refresh_token {
                bridge.set_refresh_token(Some(rotated));
            }
        }
        Some(payload.access_token)
    }

    async fn refresh_once(&self) -> Result<String, RefreshError> {
        info!(native = self.native, "refreshing access token");
        let generation = self.transport.store().generation();
        match self.call_refresh().await {
            Ok(payload) => match self.apply_tokens(generation, payload) {
                Some(token) => {
                    info!("access token refreshed");
                    Ok(token)
                }
                None => {
                    warn!("session ended while refreshing, discarding issued tokens");
                    Err(RefreshError::Discarded)
                }
            },
            Err(e) => {
                let store = self.transport.store();
                if store.generation() != generation {
                    debug!(err = %e, "refresh failed after the session ended");
                    return Err(e);
                }
                warn!(err = %e, "refresh failed, ending session");
                store.clear("refresh failed");
                store.set_status(SessionStatus::Unauthenticated);
                if self.native {
                    self.transport.bridge().set_refresh_token(None);
                }
                Err(e)
            }
        }
    }

    async fn call_refresh(&self) -> Result<TokenPayload, RefreshError> {
        let mut req = ApiRequest::post(REFRESH_PATH);
        if self.native {
            let Some(refresh_token) = self.transport.bridge().refresh_token() else {
                return Err(RefreshError::Rejected {
                    status: 401,
                    message: "no stored refresh token".into(),
                });
            };
            req = req
                .json(&NativeRefreshRequest { refresh_token })
                .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        }

        let resp = match self.transport.execute(&req).await {
            Ok(resp) => resp,
            Err(ApiError::Transport(msg)) => return Err(RefreshError::Transport(msg)),
            Err(e) => {
                return Err(RefreshError::Rejected {
                    status: e.status().unwrap_or_default(),
                    message: e.to_string(),
                })
            }
        };
        let payload: TokenPayload =
            resp.json().map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if payload.access_token.is_empty() {
            return Err(RefreshError::Malformed("empty accessToken".into()));
        }
        Ok(payload)
    }
}

impl RefreshTrigger for Arc<RefreshCoordinator> {
    fn trigger(&self) -> impl Future<Output = ()> + Send {
        let this = Arc::clone(self);
        async move {
            // Failure already cleared the session; nothing else to do here.
            if let Err(e) = this.ensure_refresh().await {
                debug!(err = %e, "scheduled refresh failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
