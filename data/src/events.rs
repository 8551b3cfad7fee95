// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, MessageKind};
use crate::status::Status;
use crate::UserId;

/// Addressable delivery scope on the realtime bus. A connection belongs to
/// its `User` room implicitly and joins the others explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(Uuid),
    User(UserId),
    StatusFeed,
    StatusAll,
    StatusCategory(String),
    Presence(UserId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conversation:{id}"),
            Room::User(id) => write!(f, "user:{id}"),
            Room::StatusFeed => write!(f, "status:feed"),
            Room::StatusAll => write!(f, "status:all"),
            Room::StatusCategory(c) => write!(f, "status:category:{c}"),
            Room::Presence(id) => write!(f, "presence:{id}"),
        }
    }
}

/// Server-to-client frame. Wire form: `{"event": "...", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew {
        conversation_id: Uuid,
        message: Box<Message>,
    },
    /// Ack to the sending connection only.
    #[serde(rename = "message:sent")]
    MessageSent {
        conversation_id: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
    },
    /// Per-user nudge for participants not currently in the conversation
    /// room.
    #[serde(rename = "message:notification")]
    MessageNotification {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: UserId,
        preview: String,
    },
    #[serde(rename = "message:read")]
    MessageRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
        read_by: UserId,
        read_at: DateTime<Utc>,
    },
    #[serde(rename = "message:error")]
    MessageError { message: String },

    #[serde(rename = "typing:start")]
    TypingStart {
        conversation_id: Uuid,
        user_id: UserId,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        conversation_id: Uuid,
        user_id: UserId,
    },

    #[serde(rename = "status:new")]
    StatusNew { status: Box<Status> },
    #[serde(rename = "status:deleted")]
    StatusDeleted { status_id: Uuid },
    #[serde(rename = "status:liked")]
    StatusLiked {
        status_id: Uuid,
        user_id: UserId,
        likes_count: u64,
    },
    #[serde(rename = "status:unliked")]
    StatusUnliked {
        status_id: Uuid,
        user_id: UserId,
        likes_count: u64,
    },
    #[serde(rename = "status:reposted")]
    StatusReposted {
        status_id: Uuid,
        user_id: UserId,
        reposts_count: u64,
    },
    #[serde(rename = "status:reply:success")]
    StatusReplySuccess {
        status_id: Uuid,
        conversation_id: Uuid,
    },
    #[serde(rename = "status:error")]
    StatusError { message: String },

    #[serde(rename = "notification:new")]
    NotificationNew { notification: Notification },

    #[serde(rename = "user:online")]
    UserOnline { user_id: UserId },
    #[serde(rename = "user:offline")]
    UserOffline { user_id: UserId },

    #[serde(rename = "presence:status")]
    PresenceStatus { statuses: HashMap<UserId, bool> },
    #[serde(rename = "presence:pong")]
    PresencePong,
    #[serde(rename = "presence:error")]
    PresenceError { message: String },
}

/// Client-to-server frame, mirroring the `ServerEvent` wire shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "conversation:join")]
    ConversationJoin { conversation_id: Uuid },
    #[serde(rename = "conversation:leave")]
    ConversationLeave { conversation_id: Uuid },

    #[serde(rename = "message:send")]
    MessageSend {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        kind: Option<MessageKind>,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
    },
    #[serde(rename = "message:read")]
    MessageRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { conversation_id: Uuid },
    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "presence:get")]
    PresenceGet { user_ids: Vec<UserId> },
    #[serde(rename = "presence:subscribe")]
    PresenceSubscribe { user_id: UserId },
    #[serde(rename = "presence:unsubscribe")]
    PresenceUnsubscribe { user_id: UserId },
    #[serde(rename = "presence:ping")]
    PresencePing,
    #[serde(rename = "presence:away")]
    PresenceAway,
    #[serde(rename = "presence:active")]
    PresenceActive,

    #[serde(rename = "status:subscribe")]
    StatusSubscribe {
        #[serde(default)]
        category: Option<String>,
    },
    #[serde(rename = "status:unsubscribe")]
    StatusUnsubscribe {
        #[serde(default)]
        category: Option<String>,
    },
    #[serde(rename = "status:like")]
    StatusLike { status_id: Uuid },
    #[serde(rename = "status:unlike")]
    StatusUnlike { status_id: Uuid },
    #[serde(rename = "status:repost")]
    StatusRepost { status_id: Uuid },
    #[serde(rename = "status:view")]
    StatusView { status_id: Uuid },
    #[serde(rename = "status:reply")]
    StatusReply { status_id: Uuid },
}

/// In-app notification payload, delivered over the bus and forwarded to
/// the external Notifier for users without a live connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_follow_the_wire_convention() {
        let id: Uuid = "7f8ad15f-9b7c-4f4e-8d25-2f2f1f4c6b01".parse().unwrap();
        assert_eq!(
            Room::Conversation(id).to_string(),
            format!("conversation:{id}")
        );
        assert_eq!(Room::User("u1".into()).to_string(), "user:u1");
        assert_eq!(Room::StatusFeed.to_string(), "status:feed");
        assert_eq!(
            Room::StatusCategory("sport".into()).to_string(),
            "status:category:sport"
        );
    }

    #[test]
    fn server_events_are_adjacently_tagged() {
        let ev = ServerEvent::StatusLiked {
            status_id: Uuid::nil(),
            user_id: "u1".into(),
            likes_count: 4,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "status:liked");
        assert_eq!(json["data"]["likes_count"], 4);
    }

    #[test]
    fn dataless_frames_round_trip() {
        let json = serde_json::json!({ "event": "presence:ping" });
        let cmd: ClientCommand = serde_json::from_value(json).unwrap();
        assert_eq!(cmd, ClientCommand::PresencePing);

        let pong = serde_json::to_value(ServerEvent::PresencePong).unwrap();
        assert_eq!(pong["event"], "presence:pong");
    }

    #[test]
    fn client_send_accepts_minimal_payload() {
        let json = serde_json::json!({
            "event": "message:send",
            "data": {
                "conversation_id": Uuid::nil(),
                "content": "salut"
            }
        });
        let cmd: ClientCommand = serde_json::from_value(json).unwrap();
        match cmd {
            ClientCommand::MessageSend {
                content,
                kind,
                reply_to_id,
                ..
            } => {
                assert_eq!(content, "salut");
                assert!(kind.is_none());
                assert!(reply_to_id.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
