// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session facade: one owned instance wires the store, bridge, HTTP
//! client, refresh coordinator, scheduler, hydrator and OAuth machine.

use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{
    load_user, LinkGoogleRequest, LoginRequest, NativeRefreshRequest, RawAuthResponse,
    RegisterBusinessOwner, LINK_GOOGLE_PATH, LOGIN_PATH, REGISTER_OWNER_PATH, UNLINK_GOOGLE_PATH,
};
use crate::bridge::{FileStore, KeyValueStore, MemoryStore, StorageBridge};
use crate::client::{ApiClient, ApiRequest, HttpTransport, LOGOUT_PATH};
use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::hydrate::{HydrationOutcome, Hydrator};
use crate::oauth::{OAuthMachine, OAuthMode, Routes, Transition};
use crate::refresh::RefreshCoordinator;
use crate::scheduler::spawn_scheduler;
use crate::store::{AuthenticatedUser, CredentialStore, SessionStatus};

/// File name of durable storage inside the state dir.
pub const STORAGE_FILE: &str = "storage.json";

pub struct Session {
    config: SessionConfig,
    api: Arc<ApiClient>,
    refresher: Arc<RefreshCoordinator>,
    hydrator: Hydrator,
    oauth: OAuthMachine,
    shutdown: CancellationToken,
}

impl Session {
    /// Wire a session over the given session-scoped and durable storage.
    pub fn new(
        config: SessionConfig,
        session_storage: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.api_url)?;
        let store = Arc::new(CredentialStore::new());
        let bridge = Arc::new(StorageBridge::new(
            Arc::new(Jar::default()),
            base_url,
            config.csrf_cookie.clone(),
            session_storage,
            durable,
        ));
        let transport = Arc::new(HttpTransport::new(&config, store, bridge)?);
        let refresher = Arc::new(RefreshCoordinator::new(Arc::clone(&transport), config.native));
        let api = Arc::new(ApiClient::new(transport, Arc::clone(&refresher)));
        let hydrator = Hydrator::new(&config, Arc::clone(&api), Arc::clone(&refresher));
        let oauth = OAuthMachine::new(Arc::clone(&api), Arc::clone(&refresher), Routes::from(&config));
        Ok(Self { config, api, refresher, hydrator, oauth, shutdown: CancellationToken::new() })
    }

    /// Session with durable storage under the configured state dir.
    pub fn open(config: SessionConfig) -> anyhow::Result<Self> {
        let durable = FileStore::open(config.state_dir().join(STORAGE_FILE));
        debug!(path = %durable.path().display(), "opened durable storage");
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(durable))
    }

    /// Session with nothing persisted.
    pub fn in_memory(config: SessionConfig) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Start proactive renewal. Stops on [`Session::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        spawn_scheduler(
            self.store().subscribe_tokens(),
            Arc::clone(&self.refresher),
            self.config.refresh_margin(),
            self.shutdown.child_token(),
        )
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.api.transport().store()
    }

    pub fn bridge(&self) -> &Arc<StorageBridge> {
        self.api.transport().bridge()
    }

    /// Authenticated API client for business calls.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.refresher
    }

    pub fn oauth(&self) -> &OAuthMachine {
        &self.oauth
    }

    pub async fn hydrate(&self, url: &str) -> HydrationOutcome {
        self.hydrator.hydrate(url).await
    }

    /// Email/password sign-in. A rejected password is an error; a business
    /// selection step comes back as a [`Transition`] like an OAuth landing.
    /// `return_to` is where the user was headed before being sent to sign in.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        return_to: Option<String>,
    ) -> Result<Transition, ApiError> {
        let body = LoginRequest { email: email.to_owned(), password: password.to_owned() };
        let raw: RawAuthResponse = self.api.post_json(LOGIN_PATH, &body).await?;
        Ok(self.oauth.accept(OAuthMode::Login, raw.into_outcome()?, return_to).await)
    }

    pub async fn register_business_owner(
        &self,
        form: &RegisterBusinessOwner,
    ) -> Result<Transition, ApiError> {
        let raw: RawAuthResponse = self.api.post_json(REGISTER_OWNER_PATH, form).await?;
        Ok(self.oauth.accept(OAuthMode::Register, raw.into_outcome()?, None).await)
    }

    /// End the session. Local state is cleared whatever the backend answers.
    pub async fn logout(&self) {
        let store = self.store();
        let bridge = self.bridge();

        let mut req = ApiRequest::post(LOGOUT_PATH);
        if let Some(refresh_token) = self.config.native.then(|| bridge.refresh_token()).flatten() {
            match req.clone().json(&NativeRefreshRequest { refresh_token }) {
                Ok(with_body) => req = with_body,
                Err(e) => debug!(err = %e, "logout without refresh token body"),
            }
        }
        if let Err(e) = self.api.transport().execute(&req).await {
            debug!(err = %e, "logout call failed, clearing locally");
        }

        store.clear("logout");
        store.set_status(SessionStatus::Unauthenticated);
        if self.config.native {
            bridge.set_refresh_token(None);
        }
        self.oauth.reset();
        info!("logged out");
    }

    pub async fn fetch_me(&self) -> Result<AuthenticatedUser, ApiError> {
        load_user(&self.api).await
    }

    /// Link a Google identity (ID token from the provider SDK) to the
    /// signed-in account.
    pub async fn link_google(&self, id_token: &str) -> Result<AuthenticatedUser, ApiError> {
        let req = ApiRequest::post(LINK_GOOGLE_PATH)
            .json(&LinkGoogleRequest { id_token: id_token.to_owned() })?;
        self.api.send(req).await?;
        info!("google identity linked");
        load_user(&self.api).await
    }

    pub async fn unlink_google(&self) -> Result<AuthenticatedUser, ApiError> {
        self.api.send(ApiRequest::post(UNLINK_GOOGLE_PATH)).await?;
        info!("google identity unlinked");
        load_user(&self.api).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
