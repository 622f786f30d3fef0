// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory credential store.
//!
//! Holds the access token, CSRF token, authenticated user and session status
//! for the lifetime of the process. Nothing here touches durable storage: the
//! access token dies with the process. Every write is a single synchronous
//! replacement under one lock, so readers never observe a half-applied update.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Whether the host should render, block behind a loading gate, or send the
/// user to the login screen.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Authenticated,
    Unauthenticated,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Loading => f.write_str("loading"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Role of the signed-in team member within their business.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Staff,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Parse a role claim; anything unrecognised maps to [`Role::Unknown`].
    pub fn from_claim(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "owner" | "business_owner" => Self::Owner,
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "staff" | "team_member" => Self::Staff,
            _ => Self::Unknown,
        }
    }
}

/// Plan and feature flags the backend attaches to the user record.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Profile, role, business linkage and entitlement snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    #[serde(default)]
    pub location_ids: Vec<String>,
    #[serde(default)]
    pub setup_wizard_completed: bool,
    #[serde(default)]
    pub entitlements: Entitlements,
    /// Built from token claims only; replaced once `/auth/me` answers.
    #[serde(skip)]
    pub stub: bool,
}

/// The credential record itself.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub access_token: Option<String>,
    pub csrf_token: Option<String>,
    pub status: SessionStatus,
    pub user: Option<AuthenticatedUser>,
}

/// Events emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new access token was written.
    TokensIssued,
    StatusChanged(SessionStatus),
    /// The record was cleared (logout or terminal refresh failure).
    LoggedOut { reason: String },
}

/// Process-wide holder of the [`CredentialRecord`].
pub struct CredentialStore {
    record: RwLock<CredentialRecord>,
    /// Bumped by every [`CredentialStore::clear`], under the record lock.
    generation: AtomicU64,
    token_tx: watch::Sender<Option<String>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        let (token_tx, _) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(64);
        Self {
            record: RwLock::new(CredentialRecord::default()),
            generation: AtomicU64::new(0),
            token_tx,
            event_tx,
        }
    }

    /// Replace both tokens. Notifies token subscribers even when the value is
    /// unchanged so a re-issued token reschedules renewal.
    pub fn set_tokens(&self, access_token: Option<String>, csrf_token: Option<String>) {
        let issued = access_token.is_some();
        {
            let mut record = self.record.write();
            record.access_token = access_token.clone();
            record.csrf_token = csrf_token;
        }
        self.token_tx.send_replace(access_token);
        if issued {
            let _ = self.event_tx.send(SessionEvent::TokensIssued);
        }
    }

    pub fn set_user(&self, user: Option<AuthenticatedUser>) {
        self.record.write().user = user;
    }

    pub fn set_status(&self, status: SessionStatus) {
        let changed = {
            let mut record = self.record.write();
            let changed = record.status != status;
            record.status = status;
            changed
        };
        if changed {
            let _ = self.event_tx.send(SessionEvent::StatusChanged(status));
        }
    }

    /// Write a freshly issued credential set and mark the session
    /// authenticated, unless the record was cleared after `generation` was
    /// read. `user` maps the held user to the one to keep.
    ///
    /// Returns `false` (and writes nothing) for a stale generation.
    pub fn issue(
        &self,
        generation: u64,
        access_token: String,
        csrf_token: Option<String>,
        user: impl FnOnce(Option<AuthenticatedUser>) -> Option<AuthenticatedUser>,
    ) -> bool {
        let status_changed = {
            let mut record = self.record.write();
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            record.access_token = Some(access_token.clone());
            record.csrf_token = csrf_token;
            record.user = user(record.user.take());
            let changed = record.status != SessionStatus::Authenticated;
            record.status = SessionStatus::Authenticated;
            // Published under the lock so a concurrent clear cannot be
            // overtaken on the token channel.
            self.token_tx.send_replace(Some(access_token));
            changed
        };
        let _ = self.event_tx.send(SessionEvent::TokensIssued);
        if status_changed {
            let _ = self.event_tx.send(SessionEvent::StatusChanged(SessionStatus::Authenticated));
        }
        true
    }

    /// Reset to the initial record and tell listeners the session ended.
    /// Writers holding an older [`generation`](Self::generation) can no
    /// longer [`issue`](Self::issue).
    pub fn clear(&self, reason: &str) {
        {
            let mut record = self.record.write();
            *record = CredentialRecord::default();
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.token_tx.send_replace(None);
        }
        let _ = self.event_tx.send(SessionEvent::LoggedOut { reason: reason.to_owned() });
    }

    /// Number of clears so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.record.read().access_token.clone()
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.record.read().csrf_token.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.record.read().status
    }

    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.record.read().user.clone()
    }

    /// Watch access-token writes (`None` after a clear).
    pub fn subscribe_tokens(&self) -> watch::Receiver<Option<String>> {
        self.token_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
