// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod auth;
pub mod challenges;
pub mod conversations;
pub mod envelope;
pub mod messages;
pub mod statuses;
pub mod tombolas;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::{ws, SharedState};

/// Assembles the full route table. CORS and body-limit layers are
/// applied by the binary, which owns their configuration.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .nest("/conversations", conversations::router())
        .nest("/messages", messages::router())
        .nest("/statuses", statuses::router())
        .nest("/tombolas", tombolas::router())
        .nest("/challenges", challenges::router())
        .route("/ws", get(ws::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
