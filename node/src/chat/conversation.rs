// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::sync::Arc;

use palaver_data::conversation::{
    AcceptanceStatus, Conversation, MessagingStatus,
};
use palaver_data::directory::Role;
use palaver_data::events::{Room, ServerEvent};
use palaver_data::page::Paged;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ChatParams;
use crate::clients::DirectoryClient;
use crate::clock::Clock;
use crate::database::{self, Conversations, Messages};
use crate::error::{CoreError, CoreResult};
use crate::realtime::Bus;

/// Conversation lifecycle: uniqueness, membership, the acceptance gate
/// and read tracking.
pub struct ConversationCore<DB> {
    db: Arc<RwLock<DB>>,
    directory: Arc<dyn DirectoryClient>,
    bus: Bus,
    clock: Arc<dyn Clock>,
    params: ChatParams,
}

impl<DB: database::DB> ConversationCore<DB> {
    pub fn new(
        db: Arc<RwLock<DB>>,
        directory: Arc<dyn DirectoryClient>,
        bus: Bus,
        clock: Arc<dyn Clock>,
        params: ChatParams,
    ) -> Self {
        Self {
            db,
            directory,
            bus,
            clock,
            params,
        }
    }

    /// The unique direct conversation between two users, created pending
    /// on first contact.
    pub async fn get_or_create_direct(
        &self,
        initiator: &str,
        other: &str,
    ) -> CoreResult<Conversation> {
        if initiator == other {
            return Err(CoreError::validation(
                "cannot open a conversation with yourself",
            ));
        }
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                if let Some(id) = tx.direct_between(initiator, other)? {
                    return tx.conversation(&id)?.ok_or_else(|| {
                        anyhow::anyhow!("dangling direct index for {id}")
                    });
                }
                let c = Conversation::direct(
                    initiator.to_owned(),
                    other.to_owned(),
                    now,
                );
                tx.store_conversation(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)
    }

    /// The unique reply conversation a user opened on a status.
    pub async fn get_or_create_status_reply(
        &self,
        status_id: Uuid,
        replyer: &str,
        author: &str,
    ) -> CoreResult<Conversation> {
        if replyer == author {
            return Err(CoreError::validation(
                "cannot reply to your own status",
            ));
        }
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                if let Some(id) =
                    tx.status_reply_conversation(&status_id, replyer)?
                {
                    return tx.conversation(&id)?.ok_or_else(|| {
                        anyhow::anyhow!("dangling reply index for {id}")
                    });
                }
                let c = Conversation::status_reply(
                    status_id,
                    replyer.to_owned(),
                    author.to_owned(),
                    now,
                );
                tx.store_conversation(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)
    }

    /// Active (non-archived) conversations, most recent activity first.
    pub async fn list(
        &self,
        user: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<Conversation>> {
        self.list_filtered(user, page, limit, false).await
    }

    /// Conversations the user archived.
    pub async fn list_archived(
        &self,
        user: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<Conversation>> {
        self.list_filtered(user, page, limit, true).await
    }

    async fn list_filtered(
        &self,
        user: &str,
        page: u64,
        limit: u64,
        archived: bool,
    ) -> CoreResult<Paged<Conversation>> {
        let mut convs = self
            .db
            .read()
            .await
            .view(|tx| tx.conversations_of(user))?;
        convs.retain(|c| c.is_archived_for(user) == archived);
        convs.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        Ok(Paged::slice(convs, page, limit))
    }

    pub async fn get(&self, id: Uuid, user: &str) -> CoreResult<Conversation> {
        let conv = self
            .db
            .read()
            .await
            .view(|tx| tx.conversation(&id))?
            .ok_or_else(|| CoreError::not_found("conversation"))?;
        if !conv.is_participant(user) {
            return Err(CoreError::not_found("conversation"));
        }
        Ok(conv)
    }

    /// Adds the user to `deleted_for`, hiding the conversation from their
    /// default listing. The next incoming message restores it.
    pub async fn archive(&self, id: Uuid, user: &str) -> CoreResult<()> {
        self.set_archived(id, user, true).await
    }

    pub async fn restore(&self, id: Uuid, user: &str) -> CoreResult<()> {
        self.set_archived(id, user, false).await
    }

    /// Archives a batch; unknown or foreign ids are skipped. Returns how
    /// many conversations were actually archived.
    pub async fn bulk_archive(
        &self,
        ids: &[Uuid],
        user: &str,
    ) -> CoreResult<u64> {
        let mut archived = 0;
        for id in ids {
            match self.archive(*id, user).await {
                Ok(()) => archived += 1,
                Err(CoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(archived)
    }

    async fn set_archived(
        &self,
        id: Uuid,
        user: &str,
        archived: bool,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        let user = user.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut conv = require_participant(tx, &id, &user)?;
                let changed = if archived {
                    conv.deleted_for.insert(user.clone())
                } else {
                    conv.deleted_for.remove(&user)
                };
                if changed {
                    conv.updated_at = now;
                    tx.store_conversation(&conv)?;
                }
                Ok(())
            })
            .map_err(CoreError::from_db)
    }

    /// Marks every message from other senders as read and resets the
    /// user's unread counter. Returns the number of newly read messages
    /// and emits `message:read` when any transitioned.
    pub async fn mark_read(&self, id: Uuid, user: &str) -> CoreResult<u64> {
        let now = self.clock.now();
        let user_owned = user.to_owned();
        let read_ids = self
            .db
            .read()
            .await
            .update(|tx| {
                let mut conv = require_participant(tx, &id, &user_owned)?;
                let unread = tx.unread_messages(&id, &user_owned)?;
                let mut read_ids = Vec::with_capacity(unread.len());
                for mut m in unread {
                    m.read_by.insert(user_owned.clone());
                    m.delivered_to.insert(user_owned.clone());
                    super::refresh_delivery_status(&mut m, &conv.participants);
                    m.updated_at = now;
                    tx.store_message(&m)?;
                    read_ids.push(m.id);
                }
                conv.unread_counts.insert(user_owned.clone(), 0);
                conv.updated_at = now;
                tx.store_conversation(&conv)?;
                Ok(read_ids)
            })
            .map_err(CoreError::from_db)?;

        if !read_ids.is_empty() {
            self.bus.emit(
                &Room::Conversation(id),
                &ServerEvent::MessageRead {
                    conversation_id: id,
                    message_ids: read_ids.clone(),
                    read_by: user.to_owned(),
                    read_at: now,
                },
            );
        }
        Ok(read_ids.len() as u64)
    }

    /// Explicit acceptance by a participant. Idempotent.
    pub async fn accept(
        &self,
        id: Uuid,
        user: &str,
    ) -> CoreResult<Conversation> {
        let now = self.clock.now();
        let user = user.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut conv = require_participant(tx, &id, &user)?;
                match conv.acceptance {
                    AcceptanceStatus::Accepted => Ok(conv),
                    AcceptanceStatus::Pending => {
                        conv.acceptance = AcceptanceStatus::Accepted;
                        conv.accepted_at = Some(now);
                        conv.updated_at = now;
                        tx.store_conversation(&conv)?;
                        Ok(conv)
                    }
                    AcceptanceStatus::Reported | AcceptanceStatus::Blocked => {
                        Err(CoreError::state(
                            "a reported conversation cannot be accepted",
                        )
                        .into())
                    }
                }
            })
            .map_err(CoreError::from_db)
    }

    /// Reporting freezes the conversation for every participant.
    pub async fn report(
        &self,
        id: Uuid,
        user: &str,
    ) -> CoreResult<Conversation> {
        let now = self.clock.now();
        let user = user.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut conv = require_participant(tx, &id, &user)?;
                if conv.acceptance != AcceptanceStatus::Reported {
                    conv.acceptance = AcceptanceStatus::Reported;
                    conv.reported_at = Some(now);
                    conv.reported_by = Some(user.clone());
                    conv.updated_at = now;
                    tx.store_conversation(&conv)?;
                }
                Ok(conv)
            })
            .map_err(CoreError::from_db)
    }

    /// The gate verdict for a would-be sender, without sending.
    pub async fn messaging_status(
        &self,
        id: Uuid,
        user: &str,
        role: Role,
    ) -> CoreResult<MessagingStatus> {
        let conv = self
            .db
            .read()
            .await
            .view(|tx| tx.conversation(&id))?
            .ok_or_else(|| CoreError::not_found("conversation"))?;
        super::messaging_status(&conv, user, role, &self.directory, &self.params)
            .await
    }
}

/// Loads a conversation and enforces membership. Outsiders get the same
/// answer as for a missing conversation.
pub(crate) fn require_participant<P: database::Persist>(
    tx: &P,
    id: &Uuid,
    user: &str,
) -> anyhow::Result<Conversation> {
    let conv = tx
        .conversation(id)?
        .ok_or(CoreError::not_found("conversation"))?;
    if !conv.is_participant(user) {
        return Err(CoreError::not_found("conversation").into());
    }
    Ok(conv)
}
