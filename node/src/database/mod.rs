// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashSet;
use std::path::Path;

pub mod rocksdb;

use anyhow::Result;
use chrono::{DateTime, Utc};
use palaver_data::challenge::{ChallengeVote, Entrepreneur, ImpactChallenge};
use palaver_data::conversation::Conversation;
use palaver_data::idem::IdemRecord;
use palaver_data::message::Message;
use palaver_data::status::{InteractionKind, Status, StatusInteraction};
use palaver_data::tombola::{TombolaMonth, TombolaTicket};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The document store. Every mutation runs inside a managed `update`
/// transaction: either all of its writes land, or none. Counter bumps and
/// find-and-update flows are read-modify-write within one transaction,
/// which the optimistic backend serializes per document.
pub trait DB: Send + Sync + 'static {
    type P<'a>: Persist;

    /// Creates or opens a database located at this path.
    ///
    /// Panics if opening or creating the store fails.
    fn create_or_open<T>(path: T, opts: DatabaseOptions) -> Self
    where
        T: AsRef<Path>;

    /// Provides a managed execution of a read-only isolated transaction.
    fn view<F, T>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(&Self::P<'a>) -> T;

    /// Provides a managed execution of a read-write atomic transaction.
    ///
    /// The commit happens only if the closure returns `Ok` and no panic is
    /// raised during its execution.
    fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&mut Self::P<'a>) -> Result<T>;

    fn close(&mut self);
}

pub trait Conversations {
    /// Upserts the whole conversation document.
    fn store_conversation(&mut self, c: &Conversation) -> Result<()>;

    fn conversation(&self, id: &Uuid) -> Result<Option<Conversation>>;

    /// The unique direct conversation between two users, if any.
    fn direct_between(&self, a: &str, b: &str) -> Result<Option<Uuid>>;

    /// The unique status-reply conversation a user opened on a status.
    fn status_reply_conversation(
        &self,
        status_id: &Uuid,
        replyer: &str,
    ) -> Result<Option<Uuid>>;

    /// Every conversation the user participates in, unordered.
    fn conversations_of(&self, user: &str) -> Result<Vec<Conversation>>;
}

pub trait Messages {
    fn store_message(&mut self, m: &Message) -> Result<()>;

    fn message(&self, id: &Uuid) -> Result<Option<Message>>;

    /// A page of a conversation's messages, newest first.
    fn messages_desc(
        &self,
        conversation_id: &Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Message>>;

    fn message_count(&self, conversation_id: &Uuid) -> Result<u64>;

    /// Messages in the conversation the reader has not read yet
    /// (not deleted, authored by someone else).
    fn unread_messages(
        &self,
        conversation_id: &Uuid,
        reader: &str,
    ) -> Result<Vec<Message>>;
}

pub trait Statuses {
    fn store_status(&mut self, s: &Status) -> Result<()>;

    fn status(&self, id: &Uuid) -> Result<Option<Status>>;

    /// Non-deleted statuses, newest first. Callers still filter on expiry
    /// and approval; deletion drops a status out of this listing.
    fn live_statuses(&self) -> Result<Vec<Status>>;

    /// All of an author's non-deleted statuses, newest first, including
    /// expired ones.
    fn statuses_by_author(&self, author: &str) -> Result<Vec<Status>>;

    /// Ids of statuses whose expiry has passed, for the reaper.
    fn expired_status_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    fn store_interaction(&mut self, i: &StatusInteraction) -> Result<()>;

    /// Removes a like/repost row; `Ok(false)` when it did not exist.
    fn delete_interaction(
        &mut self,
        status_id: &Uuid,
        user: &str,
        kind: InteractionKind,
    ) -> Result<bool>;

    fn interaction_exists(
        &self,
        status_id: &Uuid,
        user: &str,
        kind: InteractionKind,
    ) -> Result<bool>;

    fn interactions_of(
        &self,
        status_id: &Uuid,
        kind: InteractionKind,
    ) -> Result<Vec<StatusInteraction>>;

    /// Which of the given statuses the viewer liked/reposted, in one pass.
    fn viewer_overlay(
        &self,
        status_ids: &[Uuid],
        user: &str,
    ) -> Result<HashSet<(Uuid, InteractionKind)>>;

    /// Latest recorded view instant of `(status, user)`.
    fn last_view_at(
        &self,
        status_id: &Uuid,
        user: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    fn record_view(
        &mut self,
        status_id: &Uuid,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

pub trait Tombolas {
    fn store_month(&mut self, m: &TombolaMonth) -> Result<()>;

    fn month(&self, id: &Uuid) -> Result<Option<TombolaMonth>>;

    fn month_id_by_date(&self, month: u32, year: i32) -> Result<Option<Uuid>>;

    /// All months, newest calendar date first.
    fn months_desc(&self) -> Result<Vec<TombolaMonth>>;

    fn open_months(&self) -> Result<Vec<TombolaMonth>>;

    fn store_ticket(&mut self, t: &TombolaTicket) -> Result<()>;

    fn ticket(&self, ticket_id: &str) -> Result<Option<TombolaTicket>>;

    /// Every ticket of a month, ascending ticket number.
    fn tickets_of_month(&self, month_id: &Uuid) -> Result<Vec<TombolaTicket>>;

    /// A user's tickets within one month, ascending user-ticket index.
    fn tickets_of_user_in_month(
        &self,
        user: &str,
        month_id: &Uuid,
    ) -> Result<Vec<TombolaTicket>>;

    /// A user's tickets across months, newest first.
    fn tickets_of_user(&self, user: &str) -> Result<Vec<TombolaTicket>>;

    fn ticket_numbers(&self, month_id: &Uuid) -> Result<Vec<u64>>;
}

pub trait Challenges {
    fn store_challenge(&mut self, c: &ImpactChallenge) -> Result<()>;

    fn challenge(&self, id: &Uuid) -> Result<Option<ImpactChallenge>>;

    fn challenge_id_by_date(
        &self,
        month: u32,
        year: i32,
    ) -> Result<Option<Uuid>>;

    /// All campaigns, newest calendar date first.
    fn challenges_desc(&self) -> Result<Vec<ImpactChallenge>>;

    fn delete_challenge(&mut self, c: &ImpactChallenge) -> Result<()>;

    fn store_entrepreneur(&mut self, e: &Entrepreneur) -> Result<()>;

    fn entrepreneur(&self, id: &Uuid) -> Result<Option<Entrepreneur>>;

    fn entrepreneurs_of(&self, challenge_id: &Uuid) -> Result<Vec<Entrepreneur>>;

    fn delete_entrepreneur(&mut self, e: &Entrepreneur) -> Result<()>;

    fn store_vote(&mut self, v: &ChallengeVote) -> Result<()>;

    fn vote(&self, id: &Uuid) -> Result<Option<ChallengeVote>>;

    /// Reverse lookup by payment session id, the webhook entry point.
    fn vote_id_by_intent(&self, session_id: &str) -> Result<Option<Uuid>>;

    fn votes_of_challenge(
        &self,
        challenge_id: &Uuid,
    ) -> Result<Vec<ChallengeVote>>;
}

pub trait Idem {
    fn idem_record(&self, session_id: &str) -> Result<Option<IdemRecord>>;

    fn store_idem_record(&mut self, r: &IdemRecord) -> Result<()>;
}

/// Implements both read-write and read-only transactions to the store.
pub trait Persist:
    Conversations
    + Messages
    + Statuses
    + Tombolas
    + Challenges
    + Idem
    + core::fmt::Debug
{
    fn clear_database(&mut self) -> Result<()>;
    fn commit(self) -> Result<()>;
    fn rollback(self) -> Result<()>;
}

pub fn into_array<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut res = [0u8; N];
    res.copy_from_slice(&value[0..N]);
    res
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Max write buffer size per column family.
    pub max_write_buffer_size: usize,

    /// Enables a set of flags for collecting store stats as log data.
    pub enable_debug: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_write_buffer_size: 1024 * 1024, // 1 MiB
            enable_debug: false,
        }
    }
}
