// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

//! Ephemeral online/typing state. TTL is the ground truth: readers filter
//! expired entries on every access and a sweeper prunes the tables so
//! they stay bounded. Nothing here ever touches the document store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::{database, LongLivedService};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceParams {
    /// Liveness of an online/socket entry without a heartbeat.
    #[serde(with = "humantime_serde")]
    pub online_ttl: Duration,
    /// Liveness of a typing indicator without a refresh.
    #[serde(with = "humantime_serde")]
    pub typing_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for PresenceParams {
    fn default() -> Self {
        Self {
            online_ttl: Duration::from_secs(300),
            typing_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct TtlEntry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> TtlEntry<T> {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// The three conceptual maps of the presence KV: `online[user] = socket`,
/// `socket[socket] = user`, `typing[conversation][user]`.
pub struct PresenceBoard {
    params: PresenceParams,
    clock: Arc<dyn Clock>,
    online: DashMap<UserId, TtlEntry<String>>,
    sockets: DashMap<String, TtlEntry<UserId>>,
    typing: DashMap<Uuid, HashMap<UserId, DateTime<Utc>>>,
}

impl PresenceBoard {
    pub fn new(params: PresenceParams, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            params,
            clock,
            online: DashMap::new(),
            sockets: DashMap::new(),
            typing: DashMap::new(),
        })
    }

    pub fn set_online(&self, user: &str, socket: &str) {
        let expires_at =
            self.clock.now() + chrono::Duration::from_std(self.params.online_ttl)
                .expect("online ttl fits chrono range");
        self.online.insert(
            user.to_owned(),
            TtlEntry {
                value: socket.to_owned(),
                expires_at,
            },
        );
        self.sockets.insert(
            socket.to_owned(),
            TtlEntry {
                value: user.to_owned(),
                expires_at,
            },
        );
    }

    /// Removes the user's online entry, its socket mapping and every
    /// typing indicator they held.
    pub fn set_offline(&self, user: &str) {
        if let Some((_, entry)) = self.online.remove(user) {
            self.sockets.remove(&entry.value);
        }
        self.typing.retain(|_, members| {
            members.remove(user);
            !members.is_empty()
        });
    }

    /// Heartbeat: extends the TTLs of the user's online/socket entries.
    pub fn refresh(&self, user: &str) {
        let expires_at =
            self.clock.now() + chrono::Duration::from_std(self.params.online_ttl)
                .expect("online ttl fits chrono range");
        if let Some(mut entry) = self.online.get_mut(user) {
            entry.expires_at = expires_at;
            if let Some(mut socket) = self.sockets.get_mut(&entry.value) {
                socket.expires_at = expires_at;
            }
        }
    }

    pub fn is_online(&self, user: &str) -> bool {
        let now = self.clock.now();
        self.online
            .get(user)
            .map(|entry| entry.live(now))
            .unwrap_or(false)
    }

    /// Multi-get: one boolean per requested id, present for every id.
    pub fn online_statuses(&self, users: &[UserId]) -> HashMap<UserId, bool> {
        users
            .iter()
            .map(|u| (u.clone(), self.is_online(u)))
            .collect()
    }

    pub fn socket_user(&self, socket: &str) -> Option<UserId> {
        let now = self.clock.now();
        self.sockets
            .get(socket)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn set_typing(&self, conversation: &Uuid, user: &str) {
        let expires_at =
            self.clock.now() + chrono::Duration::from_std(self.params.typing_ttl)
                .expect("typing ttl fits chrono range");
        self.typing
            .entry(*conversation)
            .or_default()
            .insert(user.to_owned(), expires_at);
    }

    pub fn clear_typing(&self, conversation: &Uuid, user: &str) {
        if let Some(mut members) = self.typing.get_mut(conversation) {
            members.remove(user);
        }
    }

    /// Users currently typing in a conversation.
    pub fn typing(&self, conversation: &Uuid) -> Vec<UserId> {
        let now = self.clock.now();
        self.typing
            .get(conversation)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(user, _)| user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Prunes expired rows from all three tables. Returns how many were
    /// dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut dropped = 0;

        self.online.retain(|_, entry| {
            let keep = entry.live(now);
            dropped += usize::from(!keep);
            keep
        });
        self.sockets.retain(|_, entry| {
            let keep = entry.live(now);
            dropped += usize::from(!keep);
            keep
        });
        self.typing.retain(|_, members| {
            members.retain(|_, expires_at| {
                let keep = *expires_at > now;
                dropped += usize::from(!keep);
                keep
            });
            !members.is_empty()
        });

        dropped
    }
}

/// Periodically prunes the presence tables.
pub struct PresenceSweepSrv {
    board: Arc<PresenceBoard>,
}

impl PresenceSweepSrv {
    pub fn new(board: Arc<PresenceBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl<DB: database::DB> LongLivedService<DB> for PresenceSweepSrv {
    async fn execute(
        &mut self,
        _db: Arc<RwLock<DB>>,
    ) -> anyhow::Result<usize> {
        let mut tick = tokio::time::interval(self.board.params.sweep_interval);
        loop {
            tick.tick().await;
            let dropped = self.board.sweep();
            if dropped > 0 {
                debug!(event = "presence_sweep", dropped);
            }
        }
    }

    fn name(&self) -> &'static str {
        "presence_sweep"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::clock::ManualClock;

    fn board() -> (Arc<PresenceBoard>, ManualClock) {
        let clock = ManualClock::at("2026-03-01T10:00:00Z".parse().unwrap());
        let board =
            PresenceBoard::new(PresenceParams::default(), Arc::new(clock.clone()));
        (board, clock)
    }

    #[test]
    fn online_entries_expire_without_heartbeat() {
        let (board, clock) = board();
        board.set_online("alice", "sock-1");
        assert!(board.is_online("alice"));
        assert_eq!(board.socket_user("sock-1").as_deref(), Some("alice"));

        clock.advance(ChronoDuration::seconds(301));
        assert!(!board.is_online("alice"));
        assert!(board.socket_user("sock-1").is_none());
    }

    #[test]
    fn refresh_extends_the_ttl() {
        let (board, clock) = board();
        board.set_online("alice", "sock-1");

        clock.advance(ChronoDuration::seconds(250));
        board.refresh("alice");
        clock.advance(ChronoDuration::seconds(250));

        assert!(board.is_online("alice"), "heartbeat must keep alice online");
    }

    #[test]
    fn statuses_cover_every_requested_id() {
        let (board, _clock) = board();
        board.set_online("alice", "sock-1");

        let statuses =
            board.online_statuses(&["alice".into(), "bob".into()]);
        assert_eq!(statuses.get("alice"), Some(&true));
        assert_eq!(statuses.get("bob"), Some(&false));
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn typing_expires_after_ten_seconds() {
        let (board, clock) = board();
        let conv = Uuid::new_v4();
        board.set_typing(&conv, "alice");
        assert_eq!(board.typing(&conv), vec!["alice".to_owned()]);

        clock.advance(ChronoDuration::seconds(11));
        assert!(board.typing(&conv).is_empty());
    }

    #[test]
    fn going_offline_clears_typing_indicators() {
        let (board, _clock) = board();
        let conv = Uuid::new_v4();
        board.set_online("alice", "sock-1");
        board.set_typing(&conv, "alice");

        board.set_offline("alice");
        assert!(!board.is_online("alice"));
        assert!(board.typing(&conv).is_empty());
    }

    #[test]
    fn sweep_prunes_expired_rows() {
        let (board, clock) = board();
        let conv = Uuid::new_v4();
        board.set_online("alice", "sock-1");
        board.set_typing(&conv, "alice");

        clock.advance(ChronoDuration::seconds(400));
        let dropped = board.sweep();
        assert_eq!(dropped, 3, "online + socket + typing rows");
        assert!(!board.is_online("alice"));
    }
}
