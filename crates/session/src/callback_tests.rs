// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Value};

use super::*;
use crate::api::GOOGLE_CODE_LOGIN_PATH;
use crate::client::ensure_crypto;
use crate::oauth::OAuthMode;
use crate::test_support::{jwt, MockBackend, Reply};

#[tokio::test]
async fn repeated_landing_is_answered_as_duplicate() -> anyhow::Result<()> {
    ensure_crypto();
    let backend = MockBackend::start().await?;
    backend.on(
        GOOGLE_CODE_LOGIN_PATH,
        Reply::ok(json!({
            "accessToken": jwt(json!({ "sub": "u-1", "exp": 4_000_000_000u64 })),
            "csrfToken": "c",
            "user": { "id": "u-1", "role": "staff" }
        })),
    );

    let session = Arc::new(backend.session()?);
    let flow = session.oauth().begin(OAuthMode::Login, None);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, mut rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(Arc::clone(&session), listener, Some(tx), shutdown.clone()));

    let url = format!("http://{addr}{CALLBACK_PATH}?code=c-1&state={}", flow.state);
    let client = reqwest::Client::new();
    let first: Value = client.get(&url).send().await?.json().await?;
    let second: Value = client.get(&url).send().await?.json().await?;

    assert_eq!(first["outcome"], "resolved");
    assert_eq!(first["navigation"]["to"], "main");
    assert_eq!(second, json!({ "outcome": "duplicate" }));
    assert_eq!(backend.calls(GOOGLE_CODE_LOGIN_PATH), 1);

    assert!(matches!(rx.recv().await, Some(CallbackOutcome::Resolved(_))));
    assert_eq!(rx.recv().await, Some(CallbackOutcome::Duplicate));

    shutdown.cancel();
    server.await??;
    Ok(())
}
