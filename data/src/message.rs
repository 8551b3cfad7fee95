// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Scheme prefix of the canonical, non-signed form a document location is
/// persisted under. Signed URLs are derived on read and never stored.
pub const STORAGE_SCHEME: &str = "storage://";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Document,
    System,
    Ad,
}

/// Coarse delivery state of a message. The per-user ground truth lives in
/// `read_by` / `delivered_to`; this field is the aggregate clients sort on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Canonical `storage://`-prefixed object path.
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

impl DocumentInfo {
    /// The raw object path, if `url` is in canonical opaque form.
    pub fn opaque_path(&self) -> Option<&str> {
        self.url.strip_prefix(STORAGE_SCHEME)
    }
}

/// Snapshot of the quoted message carried on a reply. Kept denormalized so
/// the quoted message never has to be fetched (or may even be deleted).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub message_id: Uuid,
    pub snippet: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyContext>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub read_by: HashSet<UserId>,
    #[serde(default)]
    pub delivered_to: HashSet<UserId>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Users that removed the message from their own view only.
    #[serde(default)]
    pub deleted_for: HashSet<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A freshly sent message: the sender has trivially read and received
    /// their own message.
    pub fn new(
        conversation_id: Uuid,
        sender_id: UserId,
        kind: MessageKind,
        content: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut read_by = HashSet::new();
        read_by.insert(sender_id.clone());
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            kind,
            content,
            document: None,
            reply_to: None,
            status: DeliveryStatus::Sent,
            delivered_to: read_by.clone(),
            read_by,
            deleted: false,
            deleted_at: None,
            deleted_for: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn visible_to(&self, user: &str) -> bool {
        !self.deleted && !self.deleted_for.contains(user)
    }

    pub fn is_unread_by(&self, user: &str) -> bool {
        !self.deleted && self.sender_id != user && !self.read_by.contains(user)
    }
}

/// One message as returned by listings: the persisted document plus a
/// freshly issued signed URL when it carries an attachment.
#[derive(Clone, Debug, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_signed_url: Option<String>,
    /// Validity hint for `document_signed_url`, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url_expires_in: Option<u64>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            message,
            document_signed_url: None,
            document_url_expires_in: None,
        }
    }
}

/// Messages of one calendar day, ascending, under a display label.
#[derive(Clone, Debug, Serialize)]
pub struct DatedMessageGroup {
    pub date: NaiveDate,
    pub label: String,
    pub messages: Vec<MessageView>,
}

/// Display label for a message-group date: `Today`, `Yesterday`, or a
/// fixed English `Mon D, YYYY` regardless of locale.
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_owned()
    } else if Some(date) == today.pred_opt() {
        "Yesterday".to_owned()
    } else {
        date.format("%b %-d, %Y").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_message_is_read_and_delivered_to_sender_only() {
        let m = Message::new(
            Uuid::new_v4(),
            "alice".into(),
            MessageKind::Text,
            "hi".into(),
            Utc::now(),
        );
        assert_eq!(m.status, DeliveryStatus::Sent);
        assert!(m.read_by.contains("alice"));
        assert!(m.delivered_to.contains("alice"));
        assert!(!m.is_unread_by("alice"));
        assert!(m.is_unread_by("bob"));
    }

    #[test]
    fn opaque_path_requires_canonical_scheme() {
        let doc = DocumentInfo {
            url: format!("{STORAGE_SCHEME}chat/abc.pdf"),
            name: "abc.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 10,
        };
        assert_eq!(doc.opaque_path(), Some("chat/abc.pdf"));

        let signed = DocumentInfo {
            url: "https://cdn.example/abc?sig=1".into(),
            ..doc
        };
        assert_eq!(signed.opaque_path(), None);
    }

    #[test]
    fn date_labels_are_fixed_english() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(date_label(today, today), "Today");
        assert_eq!(
            date_label(today.pred_opt().unwrap(), today),
            "Yesterday"
        );
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2026, 1, 9).unwrap(), today),
            "Jan 9, 2026"
        );
    }
}
