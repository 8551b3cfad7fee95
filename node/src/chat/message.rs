// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashMap;

use std::sync::Arc;

use metrics::counter;
use palaver_data::conversation::{AcceptanceStatus, Conversation};
use palaver_data::directory::Role;
use palaver_data::events::{Room, ServerEvent};
use palaver_data::message::{
    date_label, DatedMessageGroup, DocumentInfo, Message, MessageKind,
    MessageView, ReplyContext, STORAGE_SCHEME,
};
use palaver_data::page::Pagination;
use palaver_data::snippet;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::conversation::require_participant;
use super::ChatParams;
use crate::clients::storage::SignedUrl;
use crate::clients::{DirectoryClient, StorageClient};
use crate::clock::Clock;
use crate::database::{self, Conversations, Messages};
use crate::error::{CoreError, CoreResult};
use crate::realtime::Bus;

/// What a sender submits. Documents arrive through [`DocumentUpload`]
/// and land here with their canonical storage path already set.
#[derive(Clone, Debug)]
pub struct SendPayload {
    pub kind: MessageKind,
    pub content: String,
    pub document: Option<DocumentInfo>,
    pub reply_to_id: Option<Uuid>,
}

impl SendPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            document: None,
            reply_to_id: None,
        }
    }
}

/// A document buffer as received from the multipart boundary. Owned by
/// the request scope; consumed by the upload.
#[derive(Debug)]
pub struct DocumentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: String,
}

/// Message creation, delivery/read tracking, forwarding and the document
/// signed-URL discipline.
pub struct MessageCore<DB> {
    db: Arc<RwLock<DB>>,
    directory: Arc<dyn DirectoryClient>,
    storage: Arc<dyn StorageClient>,
    bus: Bus,
    clock: Arc<dyn Clock>,
    params: ChatParams,
}

impl<DB: database::DB> MessageCore<DB> {
    pub fn new(
        db: Arc<RwLock<DB>>,
        directory: Arc<dyn DirectoryClient>,
        storage: Arc<dyn StorageClient>,
        bus: Bus,
        clock: Arc<dyn Clock>,
        params: ChatParams,
    ) -> Self {
        Self {
            db,
            directory,
            storage,
            bus,
            clock,
            params,
        }
    }

    /// Validates the gate and the payload, persists the message together
    /// with the conversation-side bookkeeping, then emits the realtime
    /// events.
    pub async fn send(
        &self,
        conversation_id: Uuid,
        sender: &str,
        sender_role: Role,
        payload: SendPayload,
    ) -> CoreResult<Message> {
        let conv = self
            .db
            .read()
            .await
            .view(|tx| tx.conversation(&conversation_id))?
            .ok_or_else(|| CoreError::not_found("conversation"))?;

        let gate = super::messaging_status(
            &conv,
            sender,
            sender_role,
            &self.directory,
            &self.params,
        )
        .await?;
        if !gate.can_send {
            return Err(CoreError::gate(
                gate.reason.expect("denied status carries a reason"),
            ));
        }

        let content = payload.content.trim().to_owned();
        if content.is_empty() && payload.document.is_none() {
            return Err(CoreError::validation("message content is empty"));
        }
        if content.chars().count() > self.params.max_content_len {
            return Err(CoreError::validation(format!(
                "message content exceeds {} characters",
                self.params.max_content_len
            )));
        }

        let reply_to = match payload.reply_to_id {
            Some(replied_id) => {
                Some(self.reply_context(&conv, replied_id).await?)
            }
            None => None,
        };

        let now = self.clock.now();
        let mut message = Message::new(
            conversation_id,
            sender.to_owned(),
            payload.kind,
            content,
            now,
        );
        message.document = payload.document;
        message.reply_to = reply_to;

        // A first send by the pending recipient accepts the conversation.
        let implicit_accept = conv.acceptance == AcceptanceStatus::Pending
            && sender != conv.initiator_id;

        {
            let message = &message;
            let sender = sender.to_owned();
            self.db
                .read()
                .await
                .update(|tx| {
                    let mut conv = tx
                        .conversation(&conversation_id)?
                        .ok_or(CoreError::not_found("conversation"))?;
                    tx.store_message(message)?;
                    conv.note_new_message(
                        message.id,
                        &sender,
                        &message.content,
                        now,
                    );
                    if implicit_accept {
                        conv.acceptance = AcceptanceStatus::Accepted;
                        conv.accepted_at = Some(now);
                    }
                    tx.store_conversation(&conv)?;
                    Ok(())
                })
                .map_err(CoreError::from_db)?;
        }

        counter!("palaver_messages_sent_total").increment(1);

        self.bus.emit(
            &Room::Conversation(conversation_id),
            &ServerEvent::MessageNew {
                conversation_id,
                message: Box::new(message.clone()),
            },
        );
        for other in conv.other_participants(sender) {
            self.bus.emit_user(
                other,
                &ServerEvent::MessageNotification {
                    conversation_id,
                    message_id: message.id,
                    sender_id: sender.to_owned(),
                    preview: snippet(
                        &message.content,
                        palaver_data::conversation::PREVIEW_LEN,
                    ),
                },
            );
        }

        Ok(message)
    }

    /// Uploads the buffer to the private bucket under a generated opaque
    /// name, sends the document message, and returns a fresh signed URL
    /// for immediate display.
    pub async fn send_document(
        &self,
        conversation_id: Uuid,
        sender: &str,
        sender_role: Role,
        upload: DocumentUpload,
    ) -> CoreResult<(Message, SignedUrl)> {
        let size = upload.bytes.len() as u64;
        let object_name = format!(
            "chat/{conversation_id}/{}{}",
            Uuid::new_v4(),
            extension_of(&upload.file_name)
        );
        let path = self
            .storage
            .upload(&object_name, &upload.mime_type, upload.bytes)
            .await?;

        let payload = SendPayload {
            kind: MessageKind::Document,
            content: upload.caption,
            document: Some(DocumentInfo {
                url: format!("{STORAGE_SCHEME}{path}"),
                name: upload.file_name,
                mime_type: upload.mime_type,
                size,
            }),
            reply_to_id: None,
        };
        let message = self
            .send(conversation_id, sender, sender_role, payload)
            .await?;
        let signed = self.storage.signed_url(&path).await?;
        Ok((message, signed))
    }

    /// One ascending page of messages visible to the viewer, with fresh
    /// signed URLs attached to document messages.
    pub async fn list(
        &self,
        conversation_id: Uuid,
        viewer: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<(Vec<MessageView>, Pagination)> {
        let (messages, total) = {
            let viewer = viewer.to_owned();
            self.db.read().await.view(|tx| {
                require_participant(tx, &conversation_id, &viewer)?;
                let page_rows = tx.messages_desc(
                    &conversation_id,
                    (page - 1) * limit,
                    limit,
                )?;
                let total = tx.message_count(&conversation_id)?;
                anyhow::Ok((page_rows, total))
            })
        }
        .map_err(CoreError::from_db)?;

        let mut messages: Vec<Message> = messages
            .into_iter()
            .filter(|m| m.visible_to(viewer))
            .collect();
        // Stored newest-first for paging; displayed oldest-first.
        messages.reverse();

        let views = self.attach_signed_urls(messages).await;
        Ok((views, Pagination::new(page, limit, total)))
    }

    /// The same page, reassembled into calendar-date groups with display
    /// labels.
    pub async fn list_grouped(
        &self,
        conversation_id: Uuid,
        viewer: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<(Vec<DatedMessageGroup>, Pagination)> {
        let (views, pagination) =
            self.list(conversation_id, viewer, page, limit).await?;

        let today = self.clock.now().date_naive();
        let mut groups: Vec<DatedMessageGroup> = Vec::new();
        for view in views {
            let date = view.message.created_at.date_naive();
            match groups.last_mut() {
                Some(group) if group.date == date => {
                    group.messages.push(view)
                }
                _ => groups.push(DatedMessageGroup {
                    date,
                    label: date_label(date, today),
                    messages: vec![view],
                }),
            }
        }
        Ok((groups, pagination))
    }

    pub async fn get(&self, id: Uuid, viewer: &str) -> CoreResult<Message> {
        let viewer_owned = viewer.to_owned();
        let message = self
            .db
            .read()
            .await
            .view(|tx| {
                let m = tx
                    .message(&id)?
                    .ok_or(CoreError::not_found("message"))?;
                require_participant(tx, &m.conversation_id, &viewer_owned)?;
                anyhow::Ok(m)
            })
            .map_err(CoreError::from_db)?;
        if !message.visible_to(viewer) {
            return Err(CoreError::not_found("message"));
        }
        Ok(message)
    }

    /// A fresh signed URL for a document message.
    pub async fn document_url(
        &self,
        id: Uuid,
        viewer: &str,
    ) -> CoreResult<SignedUrl> {
        let message = self.get(id, viewer).await?;
        let document = message
            .document
            .as_ref()
            .ok_or_else(|| CoreError::validation("message has no document"))?;
        let path = document.opaque_path().ok_or_else(|| {
            CoreError::validation("document is not in canonical form")
        })?;
        Ok(self.storage.signed_url(path).await?)
    }

    /// Only the sender may delete for everyone; the tombstone stays in
    /// the store.
    pub async fn soft_delete(&self, id: Uuid, sender: &str) -> CoreResult<()> {
        let now = self.clock.now();
        let sender = sender.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut m = tx
                    .message(&id)?
                    .ok_or(CoreError::not_found("message"))?;
                if m.sender_id != sender {
                    return Err(CoreError::forbidden(
                        "NOT_MESSAGE_SENDER",
                        "only the sender can delete a message",
                    )
                    .into());
                }
                if !m.deleted {
                    m.deleted = true;
                    m.deleted_at = Some(now);
                    m.updated_at = now;
                    tx.store_message(&m)?;
                }
                Ok(())
            })
            .map_err(CoreError::from_db)
    }

    /// Hides the message from one participant's view only.
    pub async fn delete_for_user(
        &self,
        id: Uuid,
        user: &str,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        let user = user.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut m = tx
                    .message(&id)?
                    .ok_or(CoreError::not_found("message"))?;
                require_participant(tx, &m.conversation_id, &user)?;
                if m.deleted_for.insert(user.clone()) {
                    m.updated_at = now;
                    tx.store_message(&m)?;
                }
                Ok(())
            })
            .map_err(CoreError::from_db)
    }

    pub async fn bulk_delete_for_user(
        &self,
        ids: &[Uuid],
        user: &str,
    ) -> CoreResult<u64> {
        let mut deleted = 0;
        for id in ids {
            match self.delete_for_user(*id, user).await {
                Ok(()) => deleted += 1,
                Err(CoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Re-sends a set of messages into a set of target conversations.
    /// Fails up front unless the user participates in every target.
    pub async fn forward(
        &self,
        message_ids: &[Uuid],
        target_conversation_ids: &[Uuid],
        user: &str,
        role: Role,
    ) -> CoreResult<Vec<Message>> {
        let sources = {
            let user_owned = user.to_owned();
            let message_ids = message_ids.to_vec();
            let targets = target_conversation_ids.to_vec();
            self.db.read().await.view(move |tx| {
                for target in &targets {
                    require_participant(tx, target, &user_owned)?;
                }
                let mut sources = Vec::with_capacity(message_ids.len());
                for id in &message_ids {
                    let m = tx
                        .message(id)?
                        .ok_or(CoreError::not_found("message"))?;
                    require_participant(tx, &m.conversation_id, &user_owned)?;
                    if !m.visible_to(&user_owned) {
                        return Err(CoreError::not_found("message").into());
                    }
                    sources.push(m);
                }
                anyhow::Ok(sources)
            })
        }
        .map_err(CoreError::from_db)?;

        let mut forwarded =
            Vec::with_capacity(sources.len() * target_conversation_ids.len());
        for target in target_conversation_ids {
            for source in &sources {
                let payload = SendPayload {
                    kind: source.kind,
                    content: source.content.clone(),
                    document: source.document.clone(),
                    // Quotes do not travel across conversations.
                    reply_to_id: None,
                };
                forwarded.push(self.send(*target, user, role, payload).await?);
            }
        }
        Ok(forwarded)
    }

    /// Adds the user to `read_by` of each message, maintains the unread
    /// counters and emits one `message:read` per touched conversation.
    pub async fn mark_read(
        &self,
        ids: &[Uuid],
        user: &str,
    ) -> CoreResult<u64> {
        self.mark(ids, user, true).await
    }

    /// Delivery acknowledgements; no events are emitted.
    pub async fn mark_delivered(
        &self,
        ids: &[Uuid],
        user: &str,
    ) -> CoreResult<u64> {
        self.mark(ids, user, false).await
    }

    async fn mark(
        &self,
        ids: &[Uuid],
        user: &str,
        read: bool,
    ) -> CoreResult<u64> {
        let now = self.clock.now();
        let per_conversation = {
            let user = user.to_owned();
            let ids = ids.to_vec();
            self.db.read().await.update(move |tx| {
                let mut conversations: HashMap<Uuid, Conversation> =
                    HashMap::new();
                let mut touched: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

                for id in &ids {
                    let Some(mut m) = tx.message(id)? else {
                        continue;
                    };
                    let conv = match conversations.entry(m.conversation_id) {
                        std::collections::hash_map::Entry::Occupied(e) => {
                            e.into_mut()
                        }
                        std::collections::hash_map::Entry::Vacant(e) => {
                            let conv = require_participant(
                                tx,
                                &m.conversation_id,
                                &user,
                            )?;
                            e.insert(conv)
                        }
                    };
                    if m.sender_id == user {
                        continue;
                    }

                    let changed = if read {
                        let newly_read = m.read_by.insert(user.clone());
                        m.delivered_to.insert(user.clone());
                        if newly_read {
                            let count = conv
                                .unread_counts
                                .entry(user.clone())
                                .or_insert(0);
                            *count = count.saturating_sub(1);
                        }
                        newly_read
                    } else {
                        m.delivered_to.insert(user.clone())
                    };

                    if changed {
                        super::refresh_delivery_status(
                            &mut m,
                            &conv.participants,
                        );
                        m.updated_at = now;
                        tx.store_message(&m)?;
                        touched
                            .entry(m.conversation_id)
                            .or_default()
                            .push(m.id);
                    }
                }

                for conv in conversations.values_mut() {
                    conv.updated_at = now;
                    tx.store_conversation(conv)?;
                }
                Ok(touched)
            })
        }
        .map_err(CoreError::from_db)?;

        let mut total = 0;
        for (conversation_id, message_ids) in per_conversation {
            total += message_ids.len() as u64;
            if read {
                self.bus.emit(
                    &Room::Conversation(conversation_id),
                    &ServerEvent::MessageRead {
                        conversation_id,
                        message_ids,
                        read_by: user.to_owned(),
                        read_at: now,
                    },
                );
            }
        }
        Ok(total)
    }

    async fn reply_context(
        &self,
        conv: &Conversation,
        replied_id: Uuid,
    ) -> CoreResult<ReplyContext> {
        let replied = self
            .db
            .read()
            .await
            .view(|tx| tx.message(&replied_id))?
            .ok_or_else(|| CoreError::not_found("message"))?;
        if replied.conversation_id != conv.id {
            return Err(CoreError::validation(
                "replied message belongs to another conversation",
            ));
        }
        let sender_name = self
            .directory
            .users_by_id(&[replied.sender_id.clone()])
            .await?
            .remove(&replied.sender_id)
            .map(|u| u.name)
            .unwrap_or_else(|| replied.sender_id.clone());
        Ok(ReplyContext {
            message_id: replied.id,
            snippet: snippet(
                &replied.content,
                palaver_data::conversation::PREVIEW_LEN,
            ),
            sender_id: replied.sender_id,
            sender_name,
            kind: replied.kind,
        })
    }

    /// Batch signed-URL refresh. Storage failures degrade to plain views;
    /// clients can still fetch URLs one by one.
    async fn attach_signed_urls(
        &self,
        messages: Vec<Message>,
    ) -> Vec<MessageView> {
        let paths: Vec<String> = messages
            .iter()
            .filter_map(|m| m.document.as_ref())
            .filter_map(|d| d.opaque_path())
            .map(str::to_owned)
            .collect();

        let urls = if paths.is_empty() {
            HashMap::new()
        } else {
            match self.storage.signed_urls(&paths).await {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(event = "signed url batch failed", %e);
                    HashMap::new()
                }
            }
        };

        messages
            .into_iter()
            .map(|m| {
                let signed = m
                    .document
                    .as_ref()
                    .and_then(|d| d.opaque_path())
                    .and_then(|p| urls.get(p).cloned());
                let mut view = MessageView::from(m);
                if let Some(url) = signed {
                    view.document_signed_url = Some(url);
                    view.document_url_expires_in =
                        Some(crate::clients::storage::SIGNED_URL_TTL_SECS);
                }
                view
            })
            .collect()
    }
}

fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
