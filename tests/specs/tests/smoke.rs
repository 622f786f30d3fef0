// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `console-session` binary
//! against a mock backend.

use std::time::Duration;

use serde_json::json;

use console_session::api::{GOOGLE_CODE_LOGIN_PATH, ME_PATH};
use console_session::client::REFRESH_PATH;
use console_session::test_support::{token_expiring_in, MockBackend, Reply};
use console_session_specs::{durable_storage, free_port, run_to_completion, ConsoleProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn hydrate_without_session_stays_offline() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;

    let out = run_to_completion(&backend.url(), dir.path(), &["hydrate", "--url", "/dashboard"]).await?;
    assert_eq!(out, vec![json!({ "outcome": "skipped_no_session" }), json!("unauthenticated")]);
    assert_eq!(backend.total_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn hydrate_on_public_route() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;

    let out =
        run_to_completion(&backend.url(), dir.path(), &["hydrate", "--url", "/reset-password?token=t"])
            .await?;
    assert_eq!(out[0], json!({ "outcome": "skipped_public_route" }));
    Ok(())
}

#[tokio::test]
async fn native_session_restores_from_durable_storage() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(
        REFRESH_PATH,
        Reply::ok(json!({
            "accessToken": token_expiring_in(3600),
            "csrfToken": "c-1",
            "refreshToken": "rt-2"
        })),
    );
    backend.on(ME_PATH, Reply::ok(json!({ "user": { "id": "u-1", "email": "n@example.com" } })));

    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join(console_session::session::STORAGE_FILE),
        json!({ "refresh_token": "rt-1" }).to_string(),
    )?;

    let out = run_to_completion(&backend.url(), dir.path(), &["--native", "me"]).await?;
    assert_eq!(out.last().map(|u| u["email"].clone()), Some(json!("n@example.com")));
    assert_eq!(backend.requests_to(REFRESH_PATH)[0].json(), json!({ "refreshToken": "rt-1" }));
    assert_eq!(durable_storage(dir.path())?["refresh_token"], "rt-2");
    Ok(())
}

#[tokio::test]
async fn oauth_listener_resolves_first_landing() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(
        GOOGLE_CODE_LOGIN_PATH,
        Reply::ok(json!({
            "accessToken": token_expiring_in(3600),
            "csrfToken": "c-1",
            "user": { "id": "u-1", "role": "staff" }
        })),
    );

    let dir = tempfile::tempdir()?;
    let port = free_port()?;
    let port_arg = port.to_string();
    let mut process =
        ConsoleProcess::spawn(&backend.url(), dir.path(), &["oauth", "--port", &port_arg])?;

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/auth/callback?code=code-1");
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let landing: serde_json::Value = loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("callback listener never came up");
        }
        if let Ok(resp) = client.get(&url).send().await {
            break resp.json().await?;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert_eq!(landing["outcome"], "resolved");

    let status = process.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "{status}");
    let out = process.json_output()?;
    assert_eq!(out[0]["state"], json!({ "state": "authenticated" }));
    assert_eq!(out[0]["navigation"], json!({ "to": "main" }));
    assert_eq!(
        backend.requests_to(GOOGLE_CODE_LOGIN_PATH)[0].json(),
        json!({ "code": "code-1" })
    );
    Ok(())
}
