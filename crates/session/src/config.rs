// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::error::DEFAULT_EXPIRED_HEADER_PATTERN;

/// Configuration for the session client.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the backend API (e.g. `https://api.example.com`).
    #[arg(long, env = "CONSOLE_API_URL", default_value = "http://127.0.0.1:3000")]
    pub api_url: String,

    /// Seconds before access token expiry to renew proactively.
    #[arg(long, default_value_t = 60, env = "CONSOLE_REFRESH_MARGIN_SECS")]
    pub refresh_margin_secs: u64,

    /// Per-request timeout for backend calls, in seconds.
    #[arg(long, default_value_t = 30, env = "CONSOLE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Name of the CSRF cookie the backend mirrors.
    #[arg(long, default_value = "csrf_token", env = "CONSOLE_CSRF_COOKIE")]
    pub csrf_cookie: String,

    /// Token-storage-backed native client: the refresh token lives in durable
    /// storage instead of a cookie.
    #[arg(long, env = "CONSOLE_NATIVE")]
    pub native: bool,

    /// Directory for durable storage. Defaults to the XDG state dir.
    #[arg(long, env = "CONSOLE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Route prefixes for public token-based pages that manage their own auth.
    #[arg(
        long = "public-route",
        env = "CONSOLE_PUBLIC_ROUTES",
        value_delimiter = ',',
        default_values_t = default_public_routes()
    )]
    pub public_routes: Vec<String>,

    /// Regex matched against `WWW-Authenticate` to detect expired tokens when
    /// the response carries no structured error code.
    #[arg(long, env = "CONSOLE_EXPIRED_HEADER_PATTERN", default_value = DEFAULT_EXPIRED_HEADER_PATTERN)]
    pub expired_header_pattern: String,

    /// Route for owners who have not completed the setup wizard.
    #[arg(long, default_value = "/setup", env = "CONSOLE_SETUP_ROUTE")]
    pub setup_route: String,

    /// Main route after sign-in.
    #[arg(long, default_value = "/dashboard", env = "CONSOLE_MAIN_ROUTE")]
    pub main_route: String,

    /// Sign-in screen; failed login-mode OAuth flows return here.
    #[arg(long, default_value = "/login", env = "CONSOLE_LOGIN_ROUTE")]
    pub login_route: String,

    /// Sign-up screen; failed register-mode OAuth flows return here.
    #[arg(long, default_value = "/register", env = "CONSOLE_REGISTER_ROUTE")]
    pub register_route: String,
}

fn default_public_routes() -> Vec<String> {
    vec!["/accept-invitation".to_owned(), "/invitation".to_owned(), "/reset-password".to_owned()]
}

impl SessionConfig {
    /// Config pointing at `api_url` with every other field at its default.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            refresh_margin_secs: 60,
            request_timeout_secs: 30,
            csrf_cookie: "csrf_token".to_owned(),
            native: false,
            state_dir: None,
            public_routes: default_public_routes(),
            expired_header_pattern: DEFAULT_EXPIRED_HEADER_PATTERN.to_owned(),
            setup_route: "/setup".to_owned(),
            main_route: "/dashboard".to_owned(),
            login_route: "/login".to_owned(),
            register_route: "/register".to_owned(),
        }
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the durable storage directory.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/console-session`,
    /// then `$HOME/.local/state/console-session`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("console-session");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/console-session");
        }
        PathBuf::from(".console-session")
    }

    /// Whether `path` belongs to a public token-based route.
    pub fn is_public_route(&self, path: &str) -> bool {
        self.public_routes.iter().any(|prefix| {
            path == prefix
                || path.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
