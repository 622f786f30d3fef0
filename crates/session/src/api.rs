// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend auth endpoint paths and payloads.

use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::store::AuthenticatedUser;

pub const ME_PATH: &str = "/auth/me";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_OWNER_PATH: &str = "/auth/register-business-owner";
pub const GOOGLE_CODE_LOGIN_PATH: &str = "/auth/google/code/login";
pub const GOOGLE_CODE_REGISTER_PATH: &str = "/auth/google/code/register";
pub const LINK_GOOGLE_BY_CODE_PATH: &str = "/auth/link/google/by-code";
pub const LINK_GOOGLE_PATH: &str = "/auth/link/google";
pub const LINK_GOOGLE_REAUTH_PATH: &str = "/auth/link/google/re-auth";
pub const UNLINK_GOOGLE_PATH: &str = "/auth/unlink/google";
pub const SELECT_BUSINESS_PATH: &str = "/auth/select-business";

/// A freshly issued credential set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    /// Only issued to native clients; web clients keep it in a cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthenticatedUser>,
}

/// One business the signed-in identity can act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Server-issued request to pick one business before credentials are minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSelection {
    pub selection_token: String,
    pub businesses: Vec<BusinessSummary>,
}

/// The Google identity matches an existing password account; the user must
/// confirm their password before the accounts are linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLinking {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub existing_roles: Vec<String>,
    #[serde(default)]
    pub linking_token: Option<String>,
}

/// What an auth endpoint answered, once shape detection is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Tokens(TokenPayload),
    BusinessSelectionRequired(BusinessSelection),
    AccountLinkingRequired(AccountLinking),
}

/// Wire shape shared by the login, register, code-exchange and
/// select-business endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    csrf_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<AuthenticatedUser>,

    #[serde(default)]
    requires_business_selection: bool,
    #[serde(default)]
    selection_token: Option<String>,
    #[serde(default)]
    businesses: Vec<BusinessSummary>,

    #[serde(default)]
    requires_account_linking: bool,
    #[serde(default)]
    linking_token: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    existing_roles: Vec<String>,
}

impl RawAuthResponse {
    /// Whether the response mints credentials or asks for a follow-up step,
    /// as opposed to a bare acknowledgement.
    pub fn carries_credentials(&self) -> bool {
        self.requires_business_selection
            || self.requires_account_linking
            || self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn into_outcome(self) -> Result<AuthOutcome, ApiError> {
        if self.requires_business_selection {
            let Some(selection_token) = self.selection_token else {
                return Err(ApiError::Decode("business selection without selectionToken".into()));
            };
            return Ok(AuthOutcome::BusinessSelectionRequired(BusinessSelection {
                selection_token,
                businesses: self.businesses,
            }));
        }
        if self.requires_account_linking {
            return Ok(AuthOutcome::AccountLinkingRequired(AccountLinking {
                email: self.email.unwrap_or_default(),
                first_name: self.first_name,
                last_name: self.last_name,
                existing_roles: self.existing_roles,
                linking_token: self.linking_token,
            }));
        }
        match self.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(AuthOutcome::Tokens(TokenPayload {
                access_token,
                csrf_token: self.csrf_token,
                refresh_token: self.refresh_token,
                user: self.user,
            })),
            _ => Err(ApiError::Decode("auth response carries no accessToken".into())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Wrapped { user: AuthenticatedUser },
    Bare(AuthenticatedUser),
}

/// Fetch `/auth/me` and replace the stored user (stub or not) with it.
pub async fn load_user(api: &ApiClient) -> Result<AuthenticatedUser, ApiError> {
    let user = match api.get_json::<MeResponse>(ME_PATH).await? {
        MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
    };
    api.transport().store().set_user(Some(user.clone()));
    Ok(user)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Self-service sign-up of a business owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBusinessOwner {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub business_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExchangeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectBusinessRequest {
    pub selection_token: String,
    pub business_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkGoogleRequest {
    pub id_token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReAuthLinkRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linking_token: Option<String>,
}

/// Body of the refresh call for native clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeRefreshRequest {
    pub refresh_token: String,
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
