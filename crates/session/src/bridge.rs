// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie and storage bridge.
//!
//! Reads the CSRF cookie out of the HTTP client's cookie jar and reads/writes
//! the handful of keys that live in ephemeral session storage (OAuth flow
//! marker, processed-code marker) or durable storage (selected location,
//! native refresh token). Pure read/write: no decisions are made here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::oauth::OAuthFlow;

const KEY_OAUTH_FLOW: &str = "oauth.flow";
const KEY_LAST_CODE: &str = "oauth.last_processed_code";
const KEY_LOCATION_ID: &str = "location_id";
const KEY_REFRESH_TOKEN: &str = "refresh_token";

/// A string key/value store (browser-session or durable storage analogue).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local storage; the analogue of browser session storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// JSON-file-backed storage that survives process restarts.
///
/// Every write rewrites the whole map atomically (unique tmp file + rename).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A missing or unreadable
    /// file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!(path = %path.display(), "ignoring unparsable storage file: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { path, entries: Mutex::new(entries) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, String>) {
        if let Err(e) = save_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), err = %e, "failed to persist storage");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries);
        }
    }
}

/// Write `value` as JSON to `path` atomically.
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// race on the same `.tmp` file: a shorter write could otherwise leave
/// trailing bytes from a longer previous write.
fn save_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Typed access to cookies and storage keys used by the session layer.
pub struct StorageBridge {
    jar: Arc<Jar>,
    base_url: Url,
    csrf_cookie: String,
    session: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    /// In-memory location selection; durable storage is the reload fallback.
    location: Mutex<Option<String>>,
}

impl StorageBridge {
    pub fn new(
        jar: Arc<Jar>,
        base_url: Url,
        csrf_cookie: impl Into<String>,
        session: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            jar,
            base_url,
            csrf_cookie: csrf_cookie.into(),
            session,
            durable,
            location: Mutex::new(None),
        }
    }

    /// The cookie jar shared with the HTTP client.
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Value of the CSRF cookie the backend mirrors for the API origin.
    pub fn csrf_cookie(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == self.csrf_cookie && !value.is_empty()).then(|| value.to_owned())
        })
    }

    // -- OAuth flow marker (session storage) ---------------------------------

    pub fn oauth_flow(&self) -> Option<OAuthFlow> {
        load_json(self.session.as_ref(), KEY_OAUTH_FLOW)
    }

    pub fn save_oauth_flow(&self, flow: &OAuthFlow) {
        save_json(self.session.as_ref(), KEY_OAUTH_FLOW, flow);
    }

    pub fn clear_oauth_flow(&self) {
        self.session.remove(KEY_OAUTH_FLOW);
    }

    pub fn last_processed_code(&self) -> Option<String> {
        self.session.get(KEY_LAST_CODE)
    }

    pub fn mark_code_processed(&self, code: &str) {
        self.session.set(KEY_LAST_CODE, code);
    }

    // -- Location context ----------------------------------------------------

    /// Current location selection, falling back to the durably stored id.
    pub fn location_id(&self) -> Option<String> {
        if let Some(id) = self.location.lock().clone() {
            return Some(id);
        }
        self.durable.get(KEY_LOCATION_ID)
    }

    pub fn select_location(&self, id: Option<&str>) {
        *self.location.lock() = id.map(str::to_owned);
        match id {
            Some(id) => self.durable.set(KEY_LOCATION_ID, id),
            None => self.durable.remove(KEY_LOCATION_ID),
        }
    }

    // -- Native refresh token (durable storage) ------------------------------

    pub fn refresh_token(&self) -> Option<String> {
        self.durable.get(KEY_REFRESH_TOKEN)
    }

    pub fn set_refresh_token(&self, token: Option<&str>) {
        match token {
            Some(t) => self.durable.set(KEY_REFRESH_TOKEN, t),
            None => self.durable.remove(KEY_REFRESH_TOKEN),
        }
    }
}

fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, "dropping unparsable storage entry: {e}");
            store.remove(key);
            None
        }
    }
}

fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(e) => warn!(key, "failed to serialize storage entry: {e}"),
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
