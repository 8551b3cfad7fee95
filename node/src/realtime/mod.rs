// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

//! In-process pub/sub indexed by room id. One node's connection set only;
//! fanning out across nodes would take an external broker and is out of
//! scope.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use palaver_data::events::{Room, ServerEvent};
use palaver_data::UserId;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

pub type ConnId = Uuid;

/// Events buffered per connection before a slow consumer starts losing
/// frames.
const CONN_BUFFER: usize = 256;

/// Room-addressed event fan-out. Cheap to clone; all clones share the
/// same connection table.
#[derive(Clone, Default)]
pub struct Bus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    conns: DashMap<ConnId, Connection>,
    rooms: DashMap<Room, HashSet<ConnId>>,
}

struct Connection {
    user_id: UserId,
    tx: mpsc::Sender<ServerEvent>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and implicitly joins its user room. The
    /// returned receiver is the connection's outbound frame stream.
    pub fn attach(
        &self,
        user_id: UserId,
    ) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CONN_BUFFER);
        self.inner.conns.insert(
            conn,
            Connection {
                user_id: user_id.clone(),
                tx,
            },
        );
        self.join(conn, Room::User(user_id));
        (conn, rx)
    }

    /// Drops a connection from every room. Returns its user id.
    pub fn detach(&self, conn: ConnId) -> Option<UserId> {
        self.inner.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
        self.inner.conns.remove(&conn).map(|(_, c)| c.user_id)
    }

    pub fn join(&self, conn: ConnId, room: Room) {
        self.inner.rooms.entry(room).or_default().insert(conn);
    }

    pub fn leave(&self, conn: ConnId, room: &Room) {
        if let Some(mut members) = self.inner.rooms.get_mut(room) {
            members.remove(&conn);
        }
    }

    /// Number of live connections a user holds.
    pub fn connection_count(&self, user: &str) -> usize {
        self.inner
            .conns
            .iter()
            .filter(|c| c.user_id == user)
            .count()
    }

    pub fn emit(&self, room: &Room, event: &ServerEvent) {
        self.emit_filtered(room, None, event)
    }

    /// Emits to a room, skipping one connection (the originator of the
    /// event, e.g. the typing user).
    pub fn emit_except(
        &self,
        room: &Room,
        skip: ConnId,
        event: &ServerEvent,
    ) {
        self.emit_filtered(room, Some(skip), event)
    }

    pub fn emit_user(&self, user: &str, event: &ServerEvent) {
        self.emit(&Room::User(user.to_owned()), event)
    }

    /// Delivers to a single connection: acks and direct replies.
    pub fn send_to(&self, conn: ConnId, event: &ServerEvent) {
        if let Some(entry) = self.inner.conns.get(&conn) {
            deliver(&entry, event);
        }
    }

    /// Emits to every live connection, regardless of rooms.
    pub fn emit_all(&self, event: &ServerEvent) {
        for entry in self.inner.conns.iter() {
            deliver(&entry, event);
        }
    }

    fn emit_filtered(
        &self,
        room: &Room,
        skip: Option<ConnId>,
        event: &ServerEvent,
    ) {
        // Snapshot membership so delivery never holds the room shard lock.
        let members: Vec<ConnId> = {
            let Some(guard) = self.inner.rooms.get(room) else {
                return;
            };
            guard.iter().copied().filter(|c| Some(*c) != skip).collect()
        };

        for conn in members {
            if let Some(entry) = self.inner.conns.get(&conn) {
                deliver(&entry, event);
            }
        }
    }
}

fn deliver(conn: &Connection, event: &ServerEvent) {
    if conn.tx.try_send(event.clone()).is_err() {
        warn!(event = "realtime frame dropped", user = %conn.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn room_members_receive_room_events() {
        let bus = Bus::new();
        let (a, mut rx_a) = bus.attach("alice".into());
        let (_b, mut rx_b) = bus.attach("bob".into());

        let conv = Uuid::new_v4();
        bus.join(a, Room::Conversation(conv));

        let ev = ServerEvent::TypingStart {
            conversation_id: conv,
            user_id: "bob".into(),
        };
        bus.emit(&Room::Conversation(conv), &ev);

        assert_eq!(rx_a.try_recv().unwrap(), ev);
        assert!(rx_b.try_recv().is_err(), "bob never joined the room");
    }

    #[tokio::test]
    async fn user_room_is_implicit_and_survives_other_leaves() {
        let bus = Bus::new();
        let (_conn, mut rx) = bus.attach("alice".into());

        let ev = ServerEvent::UserOnline {
            user_id: "bob".into(),
        };
        bus.emit_user("alice", &ev);
        assert_eq!(rx.try_recv().unwrap(), ev);
    }

    #[tokio::test]
    async fn emit_except_skips_the_originator() {
        let bus = Bus::new();
        let (a, mut rx_a) = bus.attach("alice".into());
        let (b, mut rx_b) = bus.attach("bob".into());

        let conv = Uuid::new_v4();
        bus.join(a, Room::Conversation(conv));
        bus.join(b, Room::Conversation(conv));

        let ev = ServerEvent::TypingStart {
            conversation_id: conv,
            user_id: "alice".into(),
        };
        bus.emit_except(&Room::Conversation(conv), a, &ev);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), ev);
    }

    #[tokio::test]
    async fn detach_clears_membership_and_counts() {
        let bus = Bus::new();
        let (a, _rx) = bus.attach("alice".into());
        assert_eq!(bus.connection_count("alice"), 1);

        assert_eq!(bus.detach(a).as_deref(), Some("alice"));
        assert_eq!(bus.connection_count("alice"), 0);
        assert!(bus.detach(a).is_none());
    }
}
