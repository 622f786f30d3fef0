// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal ahead of access token expiry.
//!
//! One timer at a time: every token write replaces the pending deadline, so
//! only the newest token's renewal ever fires.

use std::future::Future;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::token::{decode_claims, refresh_delay};

/// Something that can renew the session when the timer fires.
pub trait RefreshTrigger: Send + Sync + 'static {
    fn trigger(&self) -> impl Future<Output = ()> + Send;
}

/// Deadline at which `token` should be renewed, or `None` when it carries no
/// readable expiry.
pub fn renewal_deadline(token: &str, margin: Duration) -> Option<Instant> {
    let exp = decode_claims(token)?.exp?;
    let delay = refresh_delay(exp, SystemTime::now(), margin);
    debug!(exp, delay_secs = delay.as_secs(), "scheduling token renewal");
    Some(Instant::now() + delay)
}

/// Spawn the scheduler loop.
///
/// Watches `tokens` (the store's access-token channel) and fires `trigger`
/// `margin` before the current token expires. A `None` token or one without
/// an `exp` claim leaves no timer armed. Runs until `shutdown` is cancelled or
/// the store goes away.
pub fn spawn_scheduler<R: RefreshTrigger>(
    mut tokens: watch::Receiver<Option<String>>,
    trigger: R,
    margin: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut deadline =
            tokens.borrow_and_update().as_deref().and_then(|t| renewal_deadline(t, margin));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = tokens.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = tokens
                        .borrow_and_update()
                        .as_deref()
                        .and_then(|t| renewal_deadline(t, margin));
                    if deadline.is_some() && next.is_none() {
                        debug!("renewal timer cancelled");
                    }
                    deadline = next;
                }
                _ = sleep_until(deadline) => {
                    deadline = None;
                    debug!("renewal timer fired");
                    trigger.trigger().await;
                }
            }
        }
        debug!("refresh scheduler stopped");
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
