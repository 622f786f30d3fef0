// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for backend calls and the single 401 classification step.

use std::fmt;

use regex::Regex;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use serde::{Deserialize, Serialize};

/// Why a 401 happened, decided once at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFailure {
    /// Access token expired; a refresh can recover.
    Expired,
    /// Token invalid or revoked; refreshing would loop.
    Invalid,
    /// Unclassified 401; treated like `Invalid`.
    Other,
}

impl TokenFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "TOKEN_EXPIRED",
            Self::Invalid => "TOKEN_INVALID",
            Self::Other => "UNAUTHORIZED",
        }
    }

    /// Map a structured backend error code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "TOKEN_EXPIRED" | "ACCESS_TOKEN_EXPIRED" | "JWT_EXPIRED" => Some(Self::Expired),
            "TOKEN_INVALID" | "INVALID_TOKEN" | "TOKEN_REVOKED" | "UNAUTHORIZED" => {
                Some(Self::Invalid)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend error envelope, flat (`{"code", "message"}`) or nested under
/// `"error"`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<NestedError>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(untagged)]
pub enum NestedError {
    Detail {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Text(String),
    #[default]
    Empty,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub fn code(&self) -> Option<&str> {
        match &self.error {
            Some(NestedError::Detail { code: Some(code), .. }) => Some(code.as_str()),
            _ => self.code.as_deref(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.error {
            Some(NestedError::Detail { message: Some(m), .. }) => Some(m.as_str()),
            Some(NestedError::Text(m)) => Some(m.as_str()),
            _ => self.message.as_deref(),
        }
    }
}

/// Classifies 401 responses.
///
/// The structured body code is authoritative. The `WWW-Authenticate` header
/// pattern and the message substring are deprecated fallbacks consulted only
/// when no recognised code is present, in that order.
#[derive(Debug, Clone)]
pub struct UnauthorizedClassifier {
    header_pattern: Regex,
}

/// Default `WWW-Authenticate` pattern for expired tokens.
pub const DEFAULT_EXPIRED_HEADER_PATTERN: &str = r"(?i)invalid_token.*expired|token.{0,16}expired";

impl UnauthorizedClassifier {
    pub fn new(header_pattern: &str) -> anyhow::Result<Self> {
        Ok(Self { header_pattern: Regex::new(header_pattern)? })
    }

    pub fn classify(&self, headers: &HeaderMap, body: &ErrorBody) -> TokenFailure {
        if let Some(failure) = body.code().and_then(TokenFailure::from_code) {
            return failure;
        }
        let header_says_expired = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| self.header_pattern.is_match(v));
        if header_says_expired {
            return TokenFailure::Expired;
        }
        match body.message() {
            Some(m) if m.to_lowercase().contains("expired") => TokenFailure::Expired,
            _ => TokenFailure::Other,
        }
    }
}

/// Terminal refresh failure, shared verbatim with every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Backend rejected the refresh (revoked or expired refresh cookie).
    Rejected { status: u16, message: String },
    /// Network failure before a response arrived.
    Transport(String),
    /// Response arrived but carried no usable token.
    Malformed(String),
    /// Tokens arrived after the session was cleared and were dropped.
    Discarded,
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, message } => write!(f, "refresh rejected ({status}): {message}"),
            Self::Transport(msg) => write!(f, "refresh transport error: {msg}"),
            Self::Malformed(msg) => write!(f, "refresh response malformed: {msg}"),
            Self::Discarded => f.write_str("refresh discarded: session ended while in flight"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Errors surfaced by [`crate::client::ApiClient`].
#[derive(Debug)]
pub enum ApiError {
    /// 401, with its classification.
    Unauthorized { failure: TokenFailure, message: String },
    /// Any other non-success status.
    Status { status: u16, code: Option<String>, message: String },
    Transport(String),
    /// Success status but the body did not match the expected shape.
    Decode(String),
    /// A reactive refresh was attempted and failed; the session is gone.
    Refresh(RefreshError),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Status { status, .. } => Some(*status),
            Self::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Whether the session should be considered dead by the caller.
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Refresh(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized { failure, message } => write!(f, "unauthorized ({failure}): {message}"),
            Self::Status { status, code: Some(code), message } => {
                write!(f, "HTTP {status} {code}: {message}")
            }
            Self::Status { status, code: None, message } => write!(f, "HTTP {status}: {message}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Refresh(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        Self::Refresh(e)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
