// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod conversation;
pub mod message;

use std::sync::Arc;

use palaver_data::conversation::{
    AcceptanceStatus, Conversation, MessagingStatus, SendBlockReason,
};
use palaver_data::directory::Role;
use palaver_data::message::Message;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};

use crate::clients::DirectoryClient;
use crate::error::CoreResult;

pub use conversation::ConversationCore;
pub use message::MessageCore;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatParams {
    /// Messages an initiator may send before the recipient accepts.
    pub free_messages: u64,
    /// Message content ceiling, in characters after trimming.
    pub max_content_len: usize,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            free_messages: 3,
            max_content_len: 5000,
        }
    }
}

/// The messaging gate. Accepted conversations are open; reported or
/// blocked ones are frozen for everyone; while pending, the recipient may
/// always reply (which accepts the conversation) and the initiator is
/// limited to the free allowance unless they are an admin or share a
/// referral link with another participant.
pub(crate) async fn messaging_status(
    conv: &Conversation,
    sender: &str,
    sender_role: Role,
    directory: &Arc<dyn DirectoryClient>,
    params: &ChatParams,
) -> CoreResult<MessagingStatus> {
    if !conv.is_participant(sender) {
        return Ok(MessagingStatus::denied(SendBlockReason::NotParticipant));
    }

    match conv.acceptance {
        AcceptanceStatus::Accepted => Ok(MessagingStatus::allowed()),
        AcceptanceStatus::Reported => Ok(MessagingStatus::denied(
            SendBlockReason::ConversationReported,
        )),
        AcceptanceStatus::Blocked => Ok(MessagingStatus::denied(
            SendBlockReason::ConversationBlocked,
        )),
        AcceptanceStatus::Pending => {
            if sender != conv.initiator_id {
                return Ok(MessagingStatus::allowed());
            }
            if sender_role.is_admin() {
                return Ok(MessagingStatus::allowed());
            }
            for other in conv.other_participants(sender) {
                if directory.has_referral_link(sender, other).await? {
                    return Ok(MessagingStatus::allowed());
                }
            }
            let sent = conv.messages_sent_by(sender);
            if sent < params.free_messages {
                Ok(MessagingStatus::allowed_with_remaining(
                    params.free_messages - sent,
                ))
            } else {
                Ok(MessagingStatus::denied(
                    SendBlockReason::MessageLimitReached,
                ))
            }
        }
    }
}

/// Re-derives the aggregate delivery status from the per-user sets.
/// Reading implies delivery.
pub(crate) fn refresh_delivery_status(
    message: &mut Message,
    participants: &[UserId],
) {
    use palaver_data::message::DeliveryStatus;

    let mut all_read = true;
    let mut all_delivered = true;
    for p in participants {
        if *p == message.sender_id {
            continue;
        }
        let read = message.read_by.contains(p);
        if !read {
            all_read = false;
            if !message.delivered_to.contains(p) {
                all_delivered = false;
            }
        }
    }

    if all_read {
        message.status = DeliveryStatus::Read;
    } else if all_delivered && message.status == DeliveryStatus::Sent {
        message.status = DeliveryStatus::Delivered;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use palaver_data::message::{DeliveryStatus, MessageKind};
    use uuid::Uuid;

    use super::*;
    use crate::test_utils::StaticDirectory;

    fn direct() -> Conversation {
        Conversation::direct("init".into(), "other".into(), Utc::now())
    }

    #[tokio::test]
    async fn recipient_may_always_send_while_pending() {
        let dir = StaticDirectory::new();
        let directory: Arc<dyn DirectoryClient> = dir;
        let conv = direct();

        let status = messaging_status(
            &conv,
            "other",
            Role::User,
            &directory,
            &ChatParams::default(),
        )
        .await
        .unwrap();
        assert!(status.can_send);
        assert!(status.messages_remaining.is_none());
    }

    #[tokio::test]
    async fn initiator_spends_the_free_allowance() {
        let directory: Arc<dyn DirectoryClient> = StaticDirectory::new();
        let mut conv = direct();
        conv.message_counts.insert("init".into(), 2);

        let status = messaging_status(
            &conv,
            "init",
            Role::User,
            &directory,
            &ChatParams::default(),
        )
        .await
        .unwrap();
        assert!(status.can_send);
        assert_eq!(status.messages_remaining, Some(1));

        conv.message_counts.insert("init".into(), 3);
        let status = messaging_status(
            &conv,
            "init",
            Role::User,
            &directory,
            &ChatParams::default(),
        )
        .await
        .unwrap();
        assert!(!status.can_send);
        assert_eq!(
            status.reason,
            Some(SendBlockReason::MessageLimitReached)
        );
    }

    #[tokio::test]
    async fn referral_link_lifts_the_limit() {
        let dir = StaticDirectory::new();
        dir.link_referral("init", "other");
        let directory: Arc<dyn DirectoryClient> = dir;

        let mut conv = direct();
        conv.message_counts.insert("init".into(), 10);

        let status = messaging_status(
            &conv,
            "init",
            Role::User,
            &directory,
            &ChatParams::default(),
        )
        .await
        .unwrap();
        assert!(status.can_send);
    }

    #[tokio::test]
    async fn admin_role_lifts_the_limit() {
        let directory: Arc<dyn DirectoryClient> = StaticDirectory::new();
        let mut conv = direct();
        conv.message_counts.insert("init".into(), 99);

        let status = messaging_status(
            &conv,
            "init",
            Role::Admin,
            &directory,
            &ChatParams::default(),
        )
        .await
        .unwrap();
        assert!(status.can_send);
    }

    #[tokio::test]
    async fn reported_conversation_is_frozen_for_everyone() {
        let directory: Arc<dyn DirectoryClient> = StaticDirectory::new();
        let mut conv = direct();
        conv.acceptance = AcceptanceStatus::Reported;

        for user in ["init", "other"] {
            let status = messaging_status(
                &conv,
                user,
                Role::User,
                &directory,
                &ChatParams::default(),
            )
            .await
            .unwrap();
            assert!(!status.can_send);
            assert_eq!(
                status.reason,
                Some(SendBlockReason::ConversationReported)
            );
        }
    }

    #[test]
    fn delivery_status_tracks_the_other_participants() {
        let participants: Vec<UserId> = vec!["a".into(), "b".into()];
        let mut m = Message::new(
            Uuid::new_v4(),
            "a".into(),
            MessageKind::Text,
            "hi".into(),
            Utc::now(),
        );

        refresh_delivery_status(&mut m, &participants);
        assert_eq!(m.status, DeliveryStatus::Sent);

        m.delivered_to.insert("b".into());
        refresh_delivery_status(&mut m, &participants);
        assert_eq!(m.status, DeliveryStatus::Delivered);

        m.read_by.insert("b".into());
        refresh_delivery_status(&mut m, &participants);
        assert_eq!(m.status, DeliveryStatus::Read);
    }
}
