// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

mod session;

use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::SharedState;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WsParams {
    /// Ping cadence on idle connections.
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,
    /// A connection silent for this long is dropped.
    #[serde(with = "humantime_serde")]
    pub inactivity: Duration,
}

impl Default for WsParams {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(25),
            inactivity: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Upgrades an authenticated connection; a bad token never reaches the
/// socket layer.
pub async fn handler(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.auth.verify(&query.token) {
        Ok(claims) => ws.on_upgrade(move |socket| {
            session::run(state, claims.into(), socket)
        }),
        Err(rejection) => rejection.into_response(),
    }
}
