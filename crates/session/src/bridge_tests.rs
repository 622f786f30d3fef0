// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::oauth::OAuthMode;

fn bridge_with(durable: Arc<dyn KeyValueStore>) -> anyhow::Result<StorageBridge> {
    let url = Url::parse("http://api.example.test/")?;
    Ok(StorageBridge::new(
        Arc::new(Jar::default()),
        url,
        "csrf_token",
        Arc::new(MemoryStore::new()),
        durable,
    ))
}

#[test]
fn csrf_cookie_is_read_from_jar() -> anyhow::Result<()> {
    let bridge = bridge_with(Arc::new(MemoryStore::new()))?;
    assert_eq!(bridge.csrf_cookie(), None);

    let url = Url::parse("http://api.example.test/auth/refresh")?;
    bridge.jar().add_cookie_str("other=1; Path=/", &url);
    bridge.jar().add_cookie_str("csrf_token=abc123; Path=/", &url);

    assert_eq!(bridge.csrf_cookie().as_deref(), Some("abc123"));
    Ok(())
}

#[test]
fn empty_csrf_cookie_counts_as_absent() -> anyhow::Result<()> {
    let bridge = bridge_with(Arc::new(MemoryStore::new()))?;
    let url = Url::parse("http://api.example.test/")?;
    bridge.jar().add_cookie_str("csrf_token=; Path=/", &url);
    assert_eq!(bridge.csrf_cookie(), None);
    Ok(())
}

#[test]
fn oauth_flow_roundtrips_and_clears() -> anyhow::Result<()> {
    let bridge = bridge_with(Arc::new(MemoryStore::new()))?;
    let flow = OAuthFlow::new(OAuthMode::Link, Some("/settings/account".to_owned()));
    bridge.save_oauth_flow(&flow);

    assert_eq!(bridge.oauth_flow(), Some(flow));
    bridge.clear_oauth_flow();
    assert_eq!(bridge.oauth_flow(), None);
    Ok(())
}

#[test]
fn corrupt_flow_entry_is_dropped() -> anyhow::Result<()> {
    let session = Arc::new(MemoryStore::new());
    session.set(KEY_OAUTH_FLOW, "{not json");
    let bridge = StorageBridge::new(
        Arc::new(Jar::default()),
        Url::parse("http://api.example.test/")?,
        "csrf_token",
        session.clone(),
        Arc::new(MemoryStore::new()),
    );
    assert_eq!(bridge.oauth_flow(), None);
    assert_eq!(session.get(KEY_OAUTH_FLOW), None);
    Ok(())
}

#[test]
fn location_falls_back_to_durable_store() -> anyhow::Result<()> {
    let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let bridge = bridge_with(Arc::clone(&durable))?;
    bridge.select_location(Some("loc-7"));

    // A fresh bridge over the same durable store models a reload.
    let reloaded = bridge_with(durable)?;
    assert_eq!(reloaded.location_id().as_deref(), Some("loc-7"));

    reloaded.select_location(None);
    assert_eq!(reloaded.location_id(), None);
    Ok(())
}

#[test]
fn file_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("storage.json");

    let store = FileStore::open(&path);
    store.set(KEY_REFRESH_TOKEN, "rt-1");
    store.set(KEY_LOCATION_ID, "loc-1");
    store.remove(KEY_LOCATION_ID);

    let reopened = FileStore::open(&path);
    assert_eq!(reopened.get(KEY_REFRESH_TOKEN).as_deref(), Some("rt-1"));
    assert_eq!(reopened.get(KEY_LOCATION_ID), None);

    // No stray temp files are left next to the store.
    let leftovers = std::fs::read_dir(path.parent().unwrap_or(dir.path()))?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[test]
fn file_store_tolerates_garbage() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("storage.json");
    std::fs::write(&path, "garbage")?;
    let store = FileStore::open(&path);
    assert_eq!(store.get("anything"), None);
    Ok(())
}

#[test]
fn racing_writers_leave_parsable_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("storage.json");
    let long = "x".repeat(4096);

    std::thread::scope(|s| {
        for writer in 0..4 {
            let path = &path;
            let long = &long;
            s.spawn(move || {
                let store = FileStore::open(path);
                for i in 0..50 {
                    let value = if (i + writer) % 2 == 0 { long.as_str() } else { "s" };
                    store.set(KEY_REFRESH_TOKEN, value);
                }
            });
        }
    });

    let data = std::fs::read_to_string(&path)?;
    let entries: HashMap<String, String> = serde_json::from_str(&data)?;
    let value = entries.get(KEY_REFRESH_TOKEN).map(String::as_str);
    assert!(value == Some("s") || value == Some(long.as_str()), "{value:?}");
    Ok(())
}
