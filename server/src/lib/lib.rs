// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod http;
pub mod ws;

use std::sync::{Arc, LazyLock};

use palaver_node::challenge::{ChallengeCore, VoteCore};
use palaver_node::chat::{ConversationCore, MessageCore};
use palaver_node::database::rocksdb::Backend;
use palaver_node::presence::PresenceBoard;
use palaver_node::realtime::Bus;
use palaver_node::status::StatusCore;
use palaver_node::tombola::TombolaCore;

use crate::http::auth::AuthKeys;
use crate::ws::WsParams;

pub static VERSION_BUILD: LazyLock<String> =
    LazyLock::new(|| rustc_tools_util::get_version_info!().to_string());

/// Everything a request handler can reach: the cores bound to the
/// RocksDB backend, the realtime bus, the presence board and the
/// verification keys. Constructed once at startup.
pub struct Services {
    pub conversations: Arc<ConversationCore<Backend>>,
    pub messages: Arc<MessageCore<Backend>>,
    pub statuses: Arc<StatusCore<Backend>>,
    pub tombola: Arc<TombolaCore<Backend>>,
    pub challenges: Arc<ChallengeCore<Backend>>,
    pub votes: Arc<VoteCore<Backend>>,
    pub presence: Arc<PresenceBoard>,
    pub bus: Bus,
    pub auth: AuthKeys,
    pub ws: WsParams,
}

pub type SharedState = Arc<Services>;

/// The complete HTTP + WebSocket surface.
pub fn router(state: SharedState) -> axum::Router {
    http::router(state)
}
