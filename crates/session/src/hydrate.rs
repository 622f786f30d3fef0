// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session hydration on startup or re-entry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::load_user;
use crate::client::ApiClient;
use crate::config::SessionConfig;
use crate::oauth::parse_location;
use crate::refresh::RefreshCoordinator;
use crate::store::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HydrationOutcome {
    /// An OAuth landing will establish the session itself.
    SkippedOAuthLanding,
    /// Public token page that manages its own auth.
    SkippedPublicRoute,
    /// No CSRF evidence that a session could exist.
    SkippedNoSession,
    Authenticated,
    Unauthenticated { reason: String },
}

/// Decides whether a refresh is worth attempting, then attempts it.
pub struct Hydrator {
    api: Arc<ApiClient>,
    refresher: Arc<RefreshCoordinator>,
    config: SessionConfig,
}

impl Hydrator {
    pub fn new(config: &SessionConfig, api: Arc<ApiClient>, refresher: Arc<RefreshCoordinator>) -> Self {
        Self { api, refresher, config: config.clone() }
    }

    /// Run the hydration gates for the page at `url` (absolute or
    /// path-and-query).
    pub async fn hydrate(&self, url: &str) -> HydrationOutcome {
        let store = self.api.transport().store();
        let bridge = self.api.transport().bridge();
        let location = parse_location(url);

        let has_code = location
            .as_ref()
            .is_some_and(|u| u.query_pairs().any(|(k, v)| k == "code" && !v.is_empty()));
        if has_code && store.access_token().is_none() {
            debug!("oauth code on landing, leaving the session to the code exchange");
            return HydrationOutcome::SkippedOAuthLanding;
        }

        let path = location.as_ref().map(|u| u.path()).unwrap_or(url);
        if self.config.is_public_route(path) {
            debug!(path, "public token route, skipping hydration");
            store.set_status(SessionStatus::Unauthenticated);
            return HydrationOutcome::SkippedPublicRoute;
        }

        if store.csrf_token().is_none() && bridge.csrf_cookie().is_none() && !self.config.native {
            debug!("no csrf evidence, skipping hydration");
            store.set_status(SessionStatus::Unauthenticated);
            return HydrationOutcome::SkippedNoSession;
        }

        store.set_status(SessionStatus::Loading);
        if let Err(e) = self.refresher.ensure_refresh().await {
            info!(err = %e, "no session to restore");
            store.set_status(SessionStatus::Unauthenticated);
            return HydrationOutcome::Unauthenticated { reason: e.to_string() };
        }

        if store.user().map_or(true, |u| u.stub) {
            if let Err(e) = load_user(&self.api).await {
                warn!(err = %e, "failed to load user during hydration");
            }
        }
        info!("session restored");
        HydrationOutcome::Authenticated
    }
}

#[cfg(test)]
#[path = "hydrate_tests.rs"]
mod tests;
