// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and credential lifecycle for the booking admin console: an
//! in-memory credential store, cookie and storage bridge, authenticated HTTP
//! client with single-flight token refresh, proactive renewal, startup
//! hydration, and the OAuth / business-selection state machine.

pub mod api;
pub mod bridge;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod hydrate;
pub mod oauth;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod test_support;
pub mod token;
