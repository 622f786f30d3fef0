// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort access token claim decoding.
//!
//! The signature is never checked here; the backend enforces validity on use.
//! Claims only drive renewal scheduling and the user stub written after a
//! refresh.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::store::{AuthenticatedUser, Entitlements, Role};

/// The subset of JWT claims the session layer reads.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry as epoch seconds.
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
}

impl TokenClaims {
    /// Build a user stub from the claims, if a subject is present.
    pub fn user_stub(&self) -> Option<AuthenticatedUser> {
        let id = self.sub.clone()?;
        Some(AuthenticatedUser {
            id,
            email: self.email.clone().unwrap_or_default(),
            first_name: None,
            last_name: None,
            role: self.role.as_deref().map(Role::from_claim).unwrap_or_default(),
            business_id: self.business_id.clone(),
            location_ids: vec![],
            setup_wizard_completed: false,
            entitlements: Entitlements::default(),
            stub: true,
        })
    }
}

/// Decode the payload segment of a compact JWT. Returns `None` for anything
/// that is not three dot-separated segments with a JSON object payload.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    // Some issuers pad; the URL-safe engine here does not accept padding.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// How long to wait before renewing a token expiring at `exp_secs`.
///
/// `Duration::ZERO` means renew now. `now` is passed in so callers and tests
/// agree on a single clock reading.
pub fn refresh_delay(exp_secs: u64, now: SystemTime, margin: Duration) -> Duration {
    let expiry = UNIX_EPOCH + Duration::from_secs(exp_secs);
    let renew_at = expiry.checked_sub(margin).unwrap_or(UNIX_EPOCH);
    renew_at.duration_since(now).unwrap_or(Duration::ZERO)
}

/// Current epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
