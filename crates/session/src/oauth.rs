// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth code landing, account linking and business selection.
//!
//! [`OAuthMachine::begin`] records an [`OAuthFlow`] before the host sends the
//! user to the identity provider. When the provider redirects back,
//! [`OAuthMachine::handle_callback`] exchanges the code exactly once, picks
//! the endpoint from the flow's mode and resolves to a [`Transition`]: the
//! new [`OAuthState`] plus where the host should go next. The flow object is
//! removed on every exit, including hand-off to a follow-up step.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{
    load_user, AccountLinking, AuthOutcome, BusinessSelection, CodeExchangeRequest,
    RawAuthResponse, ReAuthLinkRequest, SelectBusinessRequest, GOOGLE_CODE_LOGIN_PATH,
    GOOGLE_CODE_REGISTER_PATH, LINK_GOOGLE_BY_CODE_PATH, LINK_GOOGLE_REAUTH_PATH,
    SELECT_BUSINESS_PATH,
};
use crate::bridge::StorageBridge;
use crate::client::ApiClient;
use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::refresh::RefreshCoordinator;
use crate::store::{AuthenticatedUser, Role};
use crate::token::epoch_secs;

/// Flow objects older than this are ignored on landing.
pub const FLOW_TTL_SECS: u64 = 600;

/// Which backend call the returned code is exchanged through.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthMode {
    #[default]
    Login,
    Register,
    Link,
}

impl std::fmt::Display for OAuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => f.write_str("login"),
            Self::Register => f.write_str("register"),
            Self::Link => f.write_str("link"),
        }
    }
}

impl std::str::FromStr for OAuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Self::Login),
            "register" => Ok(Self::Register),
            "link" => Ok(Self::Link),
            other => anyhow::bail!("unknown oauth mode: {other}"),
        }
    }
}

/// One outbound trip to the identity provider, persisted in session storage
/// until the landing is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthFlow {
    pub mode: OAuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
    /// Nonce handed to the provider and echoed back as `state`.
    pub state: String,
    pub started_at: u64,
}

impl OAuthFlow {
    pub fn new(mode: OAuthMode, return_to: Option<String>) -> Self {
        Self { mode, return_to, state: Uuid::new_v4().to_string(), started_at: epoch_secs() }
    }

    pub fn is_stale(&self, now: u64) -> bool {
        now.saturating_sub(self.started_at) > FLOW_TTL_SECS
    }
}

/// Current position of the state machine.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OAuthState {
    #[default]
    Idle,
    CodeReceived {
        mode: OAuthMode,
    },
    Exchanging {
        mode: OAuthMode,
    },
    Authenticated,
    BusinessSelectionRequired {
        mode: OAuthMode,
        selection: BusinessSelection,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_to: Option<String>,
    },
    AccountLinkingRequired {
        mode: OAuthMode,
        linking: AccountLinking,
        #[serde(skip_serializing_if = "Option::is_none")]
        return_to: Option<String>,
        /// Last confirmation failure, shown inline.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Failed {
        mode: OAuthMode,
        message: String,
    },
}

/// Where the host should take the user next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Navigation {
    /// Owner who has not finished the setup wizard.
    Setup,
    Main,
    ReturnTo { path: String },
    Login { error: Option<String> },
    Register { error: Option<String> },
    /// Keep the current screen; a follow-up step or inline error is pending.
    Stay,
}

impl Navigation {
    /// Route path for this navigation, `None` for [`Navigation::Stay`].
    pub fn path<'a>(&'a self, routes: &'a Routes) -> Option<&'a str> {
        match self {
            Self::Setup => Some(routes.setup.as_str()),
            Self::Main => Some(routes.main.as_str()),
            Self::ReturnTo { path } => Some(path.as_str()),
            Self::Login { .. } => Some(routes.login.as_str()),
            Self::Register { .. } => Some(routes.register.as_str()),
            Self::Stay => None,
        }
    }
}

/// Route table the host navigates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub setup: String,
    pub main: String,
    pub login: String,
    pub register: String,
}

impl From<&SessionConfig> for Routes {
    fn from(config: &SessionConfig) -> Self {
        Self {
            setup: config.setup_route.clone(),
            main: config.main_route.clone(),
            login: config.login_route.clone(),
            register: config.register_route.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: OAuthState,
    pub navigation: Navigation,
}

/// Result of feeding a redirect landing into the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The URL carries neither `code` nor `error`.
    NotACallback,
    /// The code was already exchanged; nothing was sent.
    Duplicate,
    Resolved(Transition),
}

pub struct OAuthMachine {
    api: Arc<ApiClient>,
    refresher: Arc<RefreshCoordinator>,
    routes: Routes,
    state: Mutex<OAuthState>,
}

impl OAuthMachine {
    pub fn new(api: Arc<ApiClient>, refresher: Arc<RefreshCoordinator>, routes: Routes) -> Self {
        Self { api, refresher, routes, state: Mutex::new(OAuthState::Idle) }
    }

    pub fn state(&self) -> OAuthState {
        self.state.lock().clone()
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    fn bridge(&self) -> &Arc<StorageBridge> {
        self.api.transport().bridge()
    }

    /// Record an outbound trip to the provider. The returned flow's `state`
    /// nonce goes to the provider SDK.
    pub fn begin(&self, mode: OAuthMode, return_to: Option<String>) -> OAuthFlow {
        let flow = OAuthFlow::new(mode, return_to);
        self.bridge().save_oauth_flow(&flow);
        *self.state.lock() = OAuthState::Idle;
        info!(%mode, "oauth flow started");
        flow
    }

    /// Drop any flow and follow-up state without navigating.
    pub fn reset(&self) {
        self.bridge().clear_oauth_flow();
        *self.state.lock() = OAuthState::Idle;
    }

    /// Process a redirect landing (`/auth/callback?code=...` or `?error=...`).
    pub async fn handle_callback(&self, url: &str) -> CallbackOutcome {
        let Some(params) = CallbackParams::parse(url) else {
            return CallbackOutcome::NotACallback;
        };
        let bridge = Arc::clone(self.bridge());

        let flow = bridge.oauth_flow().filter(|f| {
            let stale = f.is_stale(epoch_secs());
            if stale {
                warn!(mode = %f.mode, "ignoring stale oauth flow");
            }
            !stale
        });
        let mode = flow.as_ref().map(|f| f.mode).unwrap_or_default();
        let return_to = flow.as_ref().and_then(|f| f.return_to.clone());

        {
            // Check-and-mark under one lock so concurrent deliveries of the
            // same code cannot both pass.
            let mut state = self.state.lock();
            if let Some(ref code) = params.code {
                if bridge.last_processed_code().as_deref() == Some(code.as_str()) {
                    debug!("duplicate oauth code delivery ignored");
                    return CallbackOutcome::Duplicate;
                }
                bridge.mark_code_processed(code);
            }
            *state = OAuthState::CodeReceived { mode };
        }
        bridge.clear_oauth_flow();

        let code = match (params.code, params.error) {
            (_, Some(error)) => {
                let message = params.error_description.unwrap_or(error);
                return CallbackOutcome::Resolved(self.fail(mode, message));
            }
            (Some(code), None) => code,
            (None, None) => return CallbackOutcome::NotACallback,
        };

        if let (Some(expected), Some(got)) = (flow.as_ref().map(|f| &f.state), &params.state) {
            if expected != got {
                return CallbackOutcome::Resolved(self.fail(mode, "oauth state mismatch".into()));
            }
        }

        *self.state.lock() = OAuthState::Exchanging { mode };
        info!(%mode, "exchanging oauth code");
        let transition = match self.exchange(mode, code).await {
            Ok(Some(outcome)) => self.accept(mode, outcome, return_to).await,
            Ok(None) => self.linked(return_to).await,
            Err(e) => self.fail(mode, e.to_string()),
        };
        CallbackOutcome::Resolved(transition)
    }

    /// `None` means the identity was linked without new credentials.
    async fn exchange(&self, mode: OAuthMode, code: String) -> Result<Option<AuthOutcome>, ApiError> {
        let body = CodeExchangeRequest { code };
        let path = match mode {
            OAuthMode::Login => GOOGLE_CODE_LOGIN_PATH,
            OAuthMode::Register => GOOGLE_CODE_REGISTER_PATH,
            OAuthMode::Link => {
                if self.api.transport().store().access_token().is_none() {
                    info!("no local access token, refreshing before link");
                    self.refresher.ensure_refresh().await?;
                }
                LINK_GOOGLE_BY_CODE_PATH
            }
        };
        let raw: RawAuthResponse = self.api.post_json(path, &body).await?;
        if mode == OAuthMode::Link && !raw.carries_credentials() {
            return Ok(None);
        }
        raw.into_outcome().map(Some)
    }

    /// Apply a sign-in outcome from any auth endpoint (code exchange,
    /// password login, registration, business selection).
    pub async fn accept(
        &self,
        mode: OAuthMode,
        outcome: AuthOutcome,
        return_to: Option<String>,
    ) -> Transition {
        match outcome {
            AuthOutcome::Tokens(payload) => {
                let generation = self.api.transport().store().generation();
                self.refresher.apply_tokens(generation, payload);
                let user = self.current_user().await;
                self.settle(OAuthState::Authenticated, landing(user.as_ref(), return_to))
            }
            AuthOutcome::BusinessSelectionRequired(selection) => {
                info!(businesses = selection.businesses.len(), "business selection required");
                self.bridge().clear_oauth_flow();
                self.settle(
                    OAuthState::BusinessSelectionRequired { mode, selection, return_to },
                    Navigation::Stay,
                )
            }
            AuthOutcome::AccountLinkingRequired(linking) => {
                info!("account linking required");
                self.bridge().clear_oauth_flow();
                self.settle(
                    OAuthState::AccountLinkingRequired { mode, linking, return_to, error: None },
                    Navigation::Stay,
                )
            }
        }
    }

    /// Finish a pending business selection.
    pub async fn select_business(&self, business_id: &str) -> Transition {
        let pending = match self.state() {
            OAuthState::BusinessSelectionRequired { mode, selection, return_to } => {
                (mode, selection, return_to)
            }
            other => {
                warn!(state = ?other, "select_business without a pending selection");
                return Transition { state: other, navigation: Navigation::Stay };
            }
        };
        let (mode, selection, return_to) = pending;
        if !selection.businesses.iter().any(|b| b.id == business_id) {
            warn!(business_id, "business not offered in selection");
            return Transition {
                state: OAuthState::BusinessSelectionRequired { mode, selection, return_to },
                navigation: Navigation::Stay,
            };
        }

        let body = SelectBusinessRequest {
            selection_token: selection.selection_token,
            business_id: business_id.to_owned(),
        };
        let result = self
            .api
            .post_json::<_, RawAuthResponse>(SELECT_BUSINESS_PATH, &body)
            .await
            .and_then(RawAuthResponse::into_outcome);
        match result {
            Ok(outcome) => self.accept(mode, outcome, return_to).await,
            Err(e) => self.fail(mode, e.to_string()),
        }
    }

    /// Confirm the password of the existing account so the provider identity
    /// can be linked to it. Failures stay inline in the linking step.
    pub async fn confirm_account_link(&self, password: &str) -> Transition {
        let (mode, linking, return_to) = match self.state() {
            OAuthState::AccountLinkingRequired { mode, linking, return_to, .. } => {
                (mode, linking, return_to)
            }
            other => {
                warn!(state = ?other, "confirm_account_link without a pending link");
                return Transition { state: other, navigation: Navigation::Stay };
            }
        };

        let body = ReAuthLinkRequest {
            email: linking.email.clone(),
            password: password.to_owned(),
            linking_token: linking.linking_token.clone(),
        };
        match self.api.post_json::<_, RawAuthResponse>(LINK_GOOGLE_REAUTH_PATH, &body).await {
            Ok(raw) if raw.carries_credentials() => match raw.into_outcome() {
                Ok(outcome) => self.accept(mode, outcome, return_to).await,
                Err(e) => self.link_error(mode, linking, return_to, e),
            },
            Ok(_) => self.linked(return_to).await,
            Err(e) => self.link_error(mode, linking, return_to, e),
        }
    }

    /// Abandon a pending follow-up step and return to where the flow began.
    pub fn cancel(&self) -> Transition {
        let mode = match self.state() {
            OAuthState::BusinessSelectionRequired { mode, .. }
            | OAuthState::AccountLinkingRequired { mode, .. }
            | OAuthState::CodeReceived { mode }
            | OAuthState::Exchanging { mode }
            | OAuthState::Failed { mode, .. } => mode,
            OAuthState::Idle | OAuthState::Authenticated => {
                self.bridge().oauth_flow().map(|f| f.mode).unwrap_or_default()
            }
        };
        debug!(%mode, "oauth flow cancelled");
        self.bridge().clear_oauth_flow();
        let navigation = match mode {
            OAuthMode::Login => Navigation::Login { error: None },
            OAuthMode::Register => Navigation::Register { error: None },
            OAuthMode::Link => Navigation::Stay,
        };
        self.settle(OAuthState::Idle, navigation)
    }

    async fn linked(&self, return_to: Option<String>) -> Transition {
        info!("provider identity linked");
        let user = self.current_user().await;
        self.settle(OAuthState::Authenticated, landing(user.as_ref(), return_to))
    }

    fn link_error(
        &self,
        mode: OAuthMode,
        linking: AccountLinking,
        return_to: Option<String>,
        e: ApiError,
    ) -> Transition {
        warn!(err = %e, "account link confirmation failed");
        self.settle(
            OAuthState::AccountLinkingRequired { mode, linking, return_to, error: Some(e.to_string()) },
            Navigation::Stay,
        )
    }

    fn fail(&self, mode: OAuthMode, message: String) -> Transition {
        warn!(%mode, %message, "oauth flow failed");
        self.bridge().clear_oauth_flow();
        let navigation = match mode {
            OAuthMode::Login => Navigation::Login { error: Some(message.clone()) },
            OAuthMode::Register => Navigation::Register { error: Some(message.clone()) },
            // Inline: the host page stays put and shows the error.
            OAuthMode::Link => Navigation::Stay,
        };
        self.settle(OAuthState::Failed { mode, message }, navigation)
    }

    fn settle(&self, state: OAuthState, navigation: Navigation) -> Transition {
        *self.state.lock() = state.clone();
        Transition { state, navigation }
    }

    /// The stored user, replacing a stub with the `/auth/me` record.
    async fn current_user(&self) -> Option<AuthenticatedUser> {
        let store = self.api.transport().store();
        match store.user() {
            Some(user) if !user.stub => Some(user),
            held => match load_user(&self.api).await {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(err = %e, "failed to load user after sign-in");
                    held
                }
            },
        }
    }
}

/// Post-sign-in destination: unfinished owners go to setup, everyone else
/// back to where they started or the main screen.
pub fn landing(user: Option<&AuthenticatedUser>, return_to: Option<String>) -> Navigation {
    if let Some(user) = user {
        if user.role == Role::Owner && !user.setup_wizard_completed {
            return Navigation::Setup;
        }
    }
    match return_to {
        Some(path) => Navigation::ReturnTo { path },
        None => Navigation::Main,
    }
}

struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    state: Option<String>,
}

impl CallbackParams {
    fn parse(url: &str) -> Option<Self> {
        let url = parse_location(url)?;
        let mut params =
            Self { code: None, error: None, error_description: None, state: None };
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                "state" => params.state = value,
                _ => {}
            }
        }
        (params.code.is_some() || params.error.is_some()).then_some(params)
    }
}

/// Parse an absolute URL or a bare path-and-query.
pub fn parse_location(url: &str) -> Option<Url> {
    Url::parse(url).ok().or_else(|| Url::parse("http://localhost/").ok()?.join(url).ok())
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
