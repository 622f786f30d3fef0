// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::*;
use crate::api::ME_PATH;
use crate::client::{CSRF_HEADER, REFRESH_PATH};
use crate::oauth::Navigation;
use crate::store::SessionEvent;
use crate::error::RefreshError;
use crate::test_support::{jwt, token_expiring_in, MockBackend, Reply};

fn login_reply() -> Reply {
    Reply::ok(json!({
        "accessToken": jwt(json!({ "sub": "u-1", "exp": 4_000_000_000u64, "role": "staff" })),
        "csrfToken": "csrf-1",
        "user": { "id": "u-1", "email": "s@example.com", "role": "staff" }
    }))
}

#[tokio::test]
async fn login_then_logout() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(LOGIN_PATH, login_reply());
    backend.on(LOGOUT_PATH, Reply::ok(json!({ "ok": true })));

    let session = backend.session()?;
    let t = session.login("s@example.com", "hunter2", None).await?;
    assert_eq!(t.navigation, Navigation::Main);
    assert_eq!(session.store().status(), SessionStatus::Authenticated);
    assert_eq!(
        backend.requests_to(LOGIN_PATH)[0].json(),
        json!({ "email": "s@example.com", "password": "hunter2" })
    );

    let token = session.store().access_token();
    let mut events = session.store().subscribe();
    session.logout().await;

    let sent = backend.requests_to(LOGOUT_PATH);
    assert_eq!(sent[0].header(CSRF_HEADER), Some("csrf-1"));
    assert_eq!(sent[0].bearer(), token.as_deref());

    let record = session.store().snapshot();
    assert_eq!(record.access_token, None);
    assert_eq!(record.user, None);
    assert_eq!(record.status, SessionStatus::Unauthenticated);
    assert_eq!(events.try_recv()?, SessionEvent::LoggedOut { reason: "logout".into() });
    Ok(())
}

#[tokio::test]
async fn login_returns_to_requested_page() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(LOGIN_PATH, login_reply());

    let session = backend.session()?;
    let t = session.login("s@example.com", "hunter2", Some("/bookings/42".into())).await?;
    assert_eq!(t.navigation, Navigation::ReturnTo { path: "/bookings/42".into() });
    Ok(())
}

#[tokio::test]
async fn rejected_password_is_an_error() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(
        LOGIN_PATH,
        Reply::json(401, json!({ "code": "INVALID_CREDENTIALS", "message": "Wrong email or password" })),
    );

    let session = backend.session()?;
    let result = session.login("s@example.com", "nope", None).await;
    assert!(matches!(result, Err(ApiError::Unauthorized { .. })), "{result:?}");
    assert_eq!(backend.calls(REFRESH_PATH), 0);
    assert_eq!(session.store().access_token(), None);
    Ok(())
}

#[tokio::test]
async fn logout_clears_even_when_backend_fails() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(LOGIN_PATH, login_reply());
    backend.on(LOGOUT_PATH, Reply::json(500, json!({ "message": "boom" })));

    let session = backend.session()?;
    session.login("s@example.com", "hunter2", None).await?;
    session.logout().await;
    assert_eq!(session.store().access_token(), None);
    assert_eq!(session.store().status(), SessionStatus::Unauthenticated);
    Ok(())
}

#[tokio::test]
async fn register_owner_lands_on_setup() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(
        REGISTER_OWNER_PATH,
        Reply::ok(json!({
            "accessToken": jwt(json!({ "sub": "u-5", "exp": 4_000_000_000u64, "role": "owner" })),
            "csrfToken": "csrf",
            "user": { "id": "u-5", "role": "owner", "setupWizardCompleted": false }
        })),
    );

    let session = backend.session()?;
    let form = RegisterBusinessOwner {
        email: "o@example.com".into(),
        password: "pw".into(),
        first_name: "Olu".into(),
        last_name: "Adeyemi".into(),
        business_name: "Fade Studio".into(),
        phone: None,
    };
    let t = session.register_business_owner(&form).await?;
    assert_eq!(t.navigation, Navigation::Setup);
    let body = backend.requests_to(REGISTER_OWNER_PATH)[0].json();
    assert_eq!(body["businessName"], "Fade Studio");
    assert!(body.get("phone").is_none());
    Ok(())
}

#[tokio::test]
async fn link_and_unlink_reload_user() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(LOGIN_PATH, login_reply());
    backend.on(LINK_GOOGLE_PATH, Reply::ok(json!({ "ok": true })));
    backend.on(UNLINK_GOOGLE_PATH, Reply::ok(json!({ "ok": true })));
    backend.on_sequence(
        ME_PATH,
        vec![
            Reply::ok(json!({ "id": "u-1", "entitlements": { "features": ["google"] } })),
            Reply::ok(json!({ "id": "u-1" })),
        ],
    );

    let session = backend.session()?;
    session.login("s@example.com", "hunter2", None).await?;

    let linked = session.link_google("id-token-1").await?;
    assert_eq!(linked.entitlements.features, vec!["google".to_owned()]);
    assert_eq!(backend.requests_to(LINK_GOOGLE_PATH)[0].json(), json!({ "idToken": "id-token-1" }));

    let unlinked = session.unlink_google().await?;
    assert!(unlinked.entitlements.features.is_empty());
    assert_eq!(session.store().user(), Some(unlinked));
    Ok(())
}

#[tokio::test]
async fn durable_storage_survives_reopen() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.on(
        REFRESH_PATH,
        Reply::ok(json!({ "accessToken": "fresh", "csrfToken": "c", "refreshToken": "rt-2" })),
    );
    let dir = tempfile::tempdir()?;
    let mut config = backend.config();
    config.native = true;
    config.state_dir = Some(dir.path().to_path_buf());

    {
        let session = Session::open(config.clone())?;
        session.bridge().set_refresh_token(Some("rt-1"));
        session.bridge().select_location(Some("loc-3"));
        session.refresher().ensure_refresh().await?;
    }

    let reopened = Session::open(config)?;
    assert_eq!(reopened.bridge().refresh_token().as_deref(), Some("rt-2"));
    assert_eq!(reopened.bridge().location_id().as_deref(), Some("loc-3"));
    // The access token itself is never persisted.
    assert_eq!(reopened.store().access_token(), None);
    Ok(())
}

#[tokio::test]
async fn logout_during_refresh_stays_logged_out() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    // Inside the renewal margin: if these tokens landed, renewal would fire
    // again straight away.
    backend.on(
        REFRESH_PATH,
        Reply::tokens(&token_expiring_in(30), "csrf-2").delay(Duration::from_millis(200)),
    );
    backend.on(LOGOUT_PATH, Reply::ok(json!({ "ok": true })));

    let session = backend.session()?;
    session.store().set_tokens(Some(token_expiring_in(3600)), Some("csrf-1".into()));
    session.store().set_status(SessionStatus::Authenticated);
    let scheduler = session.start();

    let refresher = Arc::clone(session.refresher());
    let pending = tokio::spawn(async move { refresher.ensure_refresh().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.logout().await;

    let result = pending.await?;
    assert!(matches!(result, Err(RefreshError::Discarded)), "{result:?}");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let record = session.store().snapshot();
    assert_eq!(record.access_token, None);
    assert_eq!(record.user, None);
    assert_eq!(record.status, SessionStatus::Unauthenticated);
    assert_eq!(backend.calls(REFRESH_PATH), 1);

    session.shutdown();
    scheduler.await?;
    Ok(())
}
