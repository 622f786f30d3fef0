// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local redirect-landing listener for hosts without a browser page of their
//! own. The provider redirects to `http://127.0.0.1:<port>/auth/callback`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Uri;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::oauth::CallbackOutcome;
use crate::session::Session;

pub const CALLBACK_PATH: &str = "/auth/callback";

#[derive(Clone)]
struct CallbackState {
    session: Arc<Session>,
    outcomes: Option<mpsc::Sender<CallbackOutcome>>,
}

/// Router serving [`CALLBACK_PATH`]. Every landing outcome (duplicates
/// included) is forwarded to `outcomes` when given.
pub fn build_router(
    session: Arc<Session>,
    outcomes: Option<mpsc::Sender<CallbackOutcome>>,
) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(landing))
        .layer(TraceLayer::new_for_http())
        .with_state(CallbackState { session, outcomes })
}

async fn landing(State(state): State<CallbackState>, uri: Uri) -> Json<CallbackOutcome> {
    let outcome = state.session.oauth().handle_callback(&uri.to_string()).await;
    if let Some(ref tx) = state.outcomes {
        let _ = tx.send(outcome.clone()).await;
    }
    Json(outcome)
}

/// Serve the landing listener until `shutdown` fires.
pub async fn serve(
    session: Arc<Session>,
    listener: TcpListener,
    outcomes: Option<mpsc::Sender<CallbackOutcome>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("oauth callback listening on http://{addr}{CALLBACK_PATH}");
    axum::serve(listener, build_router(session, outcomes))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
