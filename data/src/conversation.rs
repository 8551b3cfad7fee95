// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{snippet, UserId};

/// Characters kept in a conversation's last-message preview.
pub const PREVIEW_LEN: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    StatusReply,
}

/// Gate state of a conversation. Limits what the initiator may send until
/// the recipient reacts; `Reported` and `Blocked` freeze messaging for
/// every participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Reported,
    Blocked,
}

/// Denormalized snapshot of the newest message, kept on the conversation
/// document so listings never touch the message collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub sender_id: UserId,
    pub preview: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// At least two distinct user ids. For direct conversations exactly two.
    pub participants: Vec<UserId>,
    pub initiator_id: UserId,
    /// Set for `StatusReply` conversations only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<Uuid>,
    pub acceptance: AcceptanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    /// Per-participant count of messages they have not read yet.
    #[serde(default)]
    pub unread_counts: HashMap<UserId, u64>,
    /// Per-participant count of messages they authored.
    #[serde(default)]
    pub message_counts: HashMap<UserId, u64>,
    /// Participants that archived (or deleted) the conversation. The
    /// document itself is never hard-deleted.
    #[serde(default)]
    pub deleted_for: HashSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn direct(initiator: UserId, other: UserId, now: DateTime<Utc>) -> Self {
        Self::new(
            ConversationKind::Direct,
            vec![initiator.clone(), other],
            initiator,
            None,
            now,
        )
    }

    pub fn status_reply(
        status_id: Uuid,
        replyer: UserId,
        author: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            ConversationKind::StatusReply,
            vec![replyer.clone(), author],
            replyer,
            Some(status_id),
            now,
        )
    }

    fn new(
        kind: ConversationKind,
        participants: Vec<UserId>,
        initiator_id: UserId,
        status_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            participants,
            initiator_id,
            status_id,
            acceptance: AcceptanceStatus::Pending,
            accepted_at: None,
            reported_at: None,
            reported_by: None,
            last_message: None,
            unread_counts: HashMap::new(),
            message_counts: HashMap::new(),
            deleted_for: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user: &str) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    pub fn other_participants<'a>(
        &'a self,
        user: &'a str,
    ) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants.iter().filter(move |p| p.as_str() != user)
    }

    pub fn messages_sent_by(&self, user: &str) -> u64 {
        self.message_counts.get(user).copied().unwrap_or(0)
    }

    pub fn unread_for(&self, user: &str) -> u64 {
        self.unread_counts.get(user).copied().unwrap_or(0)
    }

    pub fn is_archived_for(&self, user: &str) -> bool {
        self.deleted_for.contains(user)
    }

    /// Records a freshly persisted message on the conversation document:
    /// last-message snapshot, counters and the sender's archive flag.
    pub fn note_new_message(
        &mut self,
        message_id: Uuid,
        sender_id: &UserId,
        content: &str,
        at: DateTime<Utc>,
    ) {
        self.last_message = Some(LastMessage {
            message_id,
            sender_id: sender_id.clone(),
            preview: snippet(content, PREVIEW_LEN),
            at,
        });
        self.deleted_for.remove(sender_id);
        *self.message_counts.entry(sender_id.clone()).or_insert(0) += 1;
        for other in self.participants.clone() {
            if &other != sender_id {
                *self.unread_counts.entry(other).or_insert(0) += 1;
            }
        }
        self.updated_at = at;
    }

    /// Instant of the latest activity, used to order listings.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.at)
            .unwrap_or(self.created_at)
    }
}

/// Machine-readable reason a send is denied. Serialized in the error
/// payload so clients can branch without string matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendBlockReason {
    ConversationReported,
    ConversationBlocked,
    MessageLimitReached,
    NotParticipant,
}

impl SendBlockReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::ConversationReported => "CONVERSATION_REPORTED",
            Self::ConversationBlocked => "CONVERSATION_BLOCKED",
            Self::MessageLimitReached => "MESSAGE_LIMIT_REACHED",
            Self::NotParticipant => "NOT_PARTICIPANT",
        }
    }
}

/// Answer to "may this user send right now?".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessagingStatus {
    pub can_send: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SendBlockReason>,
    /// Only present while the initiator is spending the pre-acceptance
    /// allowance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_remaining: Option<u64>,
}

impl MessagingStatus {
    pub fn allowed() -> Self {
        Self {
            can_send: true,
            reason: None,
            messages_remaining: None,
        }
    }

    pub fn allowed_with_remaining(remaining: u64) -> Self {
        Self {
            can_send: true,
            reason: None,
            messages_remaining: Some(remaining),
        }
    }

    pub fn denied(reason: SendBlockReason) -> Self {
        Self {
            can_send: false,
            reason: Some(reason),
            messages_remaining: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn note_new_message_updates_counters_and_snapshot() {
        let mut c = Conversation::direct("alice".into(), "bob".into(), now());
        c.deleted_for.insert("alice".into());

        let id = Uuid::new_v4();
        c.note_new_message(id, &"alice".into(), "  hello bob  ", now());

        assert_eq!(c.messages_sent_by("alice"), 1);
        assert_eq!(c.messages_sent_by("bob"), 0);
        assert_eq!(c.unread_for("bob"), 1);
        assert_eq!(c.unread_for("alice"), 0);
        assert!(!c.is_archived_for("alice"), "sender must be unarchived");

        let last = c.last_message.expect("snapshot present");
        assert_eq!(last.message_id, id);
        assert_eq!(last.preview, "hello bob");
    }

    #[test]
    fn preview_is_capped() {
        let mut c = Conversation::direct("a".into(), "b".into(), now());
        c.note_new_message(Uuid::new_v4(), &"a".into(), &"x".repeat(400), now());
        let preview = c.last_message.unwrap().preview;
        assert!(preview.chars().count() <= PREVIEW_LEN);
    }

    #[test]
    fn block_reasons_have_stable_codes() {
        assert_eq!(
            SendBlockReason::MessageLimitReached.code(),
            "MESSAGE_LIMIT_REACHED"
        );
        assert_eq!(
            SendBlockReason::ConversationBlocked.code(),
            "CONVERSATION_BLOCKED"
        );
    }
}
