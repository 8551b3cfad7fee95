// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use palaver_data::challenge::{ChallengeVote, Entrepreneur, ImpactChallenge};
use palaver_data::conversation::{Conversation, ConversationKind};
use palaver_data::idem::IdemRecord;
use palaver_data::message::Message;
use palaver_data::status::{InteractionKind, Status, StatusInteraction};
use palaver_data::tombola::{TombolaMonth, TombolaStatus, TombolaTicket};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBAccess, LogLevel,
    OptimisticTransactionDB, OptimisticTransactionOptions, Options,
    WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{
    Challenges, Conversations, DatabaseOptions, Idem, Messages, Persist,
    Statuses, Tombolas, DB,
};

const CF_CONVERSATIONS: &str = "cf_conversations";
const CF_CONVERSATIONS_USER: &str = "cf_conversations_user";
const CF_CONVERSATIONS_DIRECT: &str = "cf_conversations_direct";
const CF_CONVERSATIONS_REPLY: &str = "cf_conversations_reply";
const CF_MESSAGES: &str = "cf_messages";
const CF_MESSAGES_CONV: &str = "cf_messages_conv";
const CF_STATUSES: &str = "cf_statuses";
const CF_STATUSES_LIVE: &str = "cf_statuses_live";
const CF_STATUSES_AUTHOR: &str = "cf_statuses_author";
const CF_STATUSES_EXPIRY: &str = "cf_statuses_expiry";
const CF_INTERACTIONS: &str = "cf_interactions";
const CF_VIEWS: &str = "cf_views";
const CF_TOMBOLA_MONTHS: &str = "cf_tombola_months";
const CF_TOMBOLA_DATE: &str = "cf_tombola_date";
const CF_TICKETS: &str = "cf_tickets";
const CF_TICKETS_MONTH: &str = "cf_tickets_month";
const CF_TICKETS_USER_MONTH: &str = "cf_tickets_user_month";
const CF_TICKETS_USER: &str = "cf_tickets_user";
const CF_CHALLENGES: &str = "cf_challenges";
const CF_CHALLENGES_DATE: &str = "cf_challenges_date";
const CF_ENTREPRENEURS: &str = "cf_entrepreneurs";
const CF_ENTREPRENEURS_CHALLENGE: &str = "cf_entrepreneurs_challenge";
const CF_VOTES: &str = "cf_votes";
const CF_VOTES_INTENT: &str = "cf_votes_intent";
const CF_VOTES_CHALLENGE: &str = "cf_votes_challenge";
const CF_IDEM: &str = "cf_idem";

const ALL_CFS: &[&str] = &[
    CF_CONVERSATIONS,
    CF_CONVERSATIONS_USER,
    CF_CONVERSATIONS_DIRECT,
    CF_CONVERSATIONS_REPLY,
    CF_MESSAGES,
    CF_MESSAGES_CONV,
    CF_STATUSES,
    CF_STATUSES_LIVE,
    CF_STATUSES_AUTHOR,
    CF_STATUSES_EXPIRY,
    CF_INTERACTIONS,
    CF_VIEWS,
    CF_TOMBOLA_MONTHS,
    CF_TOMBOLA_DATE,
    CF_TICKETS,
    CF_TICKETS_MONTH,
    CF_TICKETS_USER_MONTH,
    CF_TICKETS_USER,
    CF_CHALLENGES,
    CF_CHALLENGES_DATE,
    CF_ENTREPRENEURS,
    CF_ENTREPRENEURS_CHALLENGE,
    CF_VOTES,
    CF_VOTES_INTENT,
    CF_VOTES_CHALLENGE,
    CF_IDEM,
];

const DB_FOLDER_NAME: &str = "palaver.db";

/// Separator between a variable-length user id and the rest of a composite
/// key. User ids are directory tokens and never contain NUL.
const SEP: u8 = 0;

#[derive(Clone)]
pub struct Backend {
    rocksdb: Arc<OptimisticTransactionDB>,
}

impl Backend {
    fn cf(&self, name: &str) -> &ColumnFamily {
        self.rocksdb
            .cf_handle(name)
            .expect("column family must exist")
    }

    fn begin_tx(&self) -> DBTransaction<'_, OptimisticTransactionDB> {
        let write_options = WriteOptions::default();
        let tx_options = OptimisticTransactionOptions::default();

        let inner = self.rocksdb.transaction_opt(&write_options, &tx_options);

        DBTransaction {
            inner,
            conversations_cf: self.cf(CF_CONVERSATIONS),
            conversations_user_cf: self.cf(CF_CONVERSATIONS_USER),
            conversations_direct_cf: self.cf(CF_CONVERSATIONS_DIRECT),
            conversations_reply_cf: self.cf(CF_CONVERSATIONS_REPLY),
            messages_cf: self.cf(CF_MESSAGES),
            messages_conv_cf: self.cf(CF_MESSAGES_CONV),
            statuses_cf: self.cf(CF_STATUSES),
            statuses_live_cf: self.cf(CF_STATUSES_LIVE),
            statuses_author_cf: self.cf(CF_STATUSES_AUTHOR),
            statuses_expiry_cf: self.cf(CF_STATUSES_EXPIRY),
            interactions_cf: self.cf(CF_INTERACTIONS),
            views_cf: self.cf(CF_VIEWS),
            tombola_months_cf: self.cf(CF_TOMBOLA_MONTHS),
            tombola_date_cf: self.cf(CF_TOMBOLA_DATE),
            tickets_cf: self.cf(CF_TICKETS),
            tickets_month_cf: self.cf(CF_TICKETS_MONTH),
            tickets_user_month_cf: self.cf(CF_TICKETS_USER_MONTH),
            tickets_user_cf: self.cf(CF_TICKETS_USER),
            challenges_cf: self.cf(CF_CHALLENGES),
            challenges_date_cf: self.cf(CF_CHALLENGES_DATE),
            entrepreneurs_cf: self.cf(CF_ENTREPRENEURS),
            entrepreneurs_challenge_cf: self.cf(CF_ENTREPRENEURS_CHALLENGE),
            votes_cf: self.cf(CF_VOTES),
            votes_intent_cf: self.cf(CF_VOTES_INTENT),
            votes_challenge_cf: self.cf(CF_VOTES_CHALLENGE),
            idem_cf: self.cf(CF_IDEM),
        }
    }
}

impl DB for Backend {
    type P<'a> = DBTransaction<'a, OptimisticTransactionDB>;

    fn create_or_open<T>(path: T, db_opts: DatabaseOptions) -> Self
    where
        T: AsRef<Path>,
    {
        let path = path.as_ref().join(DB_FOLDER_NAME);
        info!("Opening database in {path:?}, {db_opts:?}");

        let mut cf_opts = Options::default();
        cf_opts.create_if_missing(true);
        cf_opts.create_missing_column_families(true);
        cf_opts.set_level_compaction_dynamic_level_bytes(true);
        cf_opts.set_write_buffer_size(db_opts.max_write_buffer_size);

        if db_opts.enable_debug {
            cf_opts.set_log_level(LogLevel::Info);
            cf_opts.set_dump_malloc_stats(true);
            cf_opts.enable_statistics();
        }

        let cfs: Vec<_> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        Self {
            rocksdb: Arc::new(
                OptimisticTransactionDB::open_cf_descriptors(
                    &cf_opts, path, cfs,
                )
                .expect("should be a valid database in {path}"),
            ),
        }
    }

    fn view<F, T>(&self, f: F) -> T
    where
        F: for<'a> FnOnce(&Self::P<'a>) -> T,
    {
        // Execute all read-only queries in isolation
        let tx = self.begin_tx();
        let ret = f(&tx);
        tx.rollback().expect("rollback to succeed for readonly");
        ret
    }

    fn update<F, T>(&self, execute: F) -> Result<T>
    where
        F: for<'a> FnOnce(&mut Self::P<'a>) -> Result<T>,
    {
        let mut tx = self.begin_tx();

        // If the closure returns err, no commit is applied to storage
        let ret = execute(&mut tx)?;
        tx.commit()?;

        Ok(ret)
    }

    fn close(&mut self) {}
}

pub struct DBTransaction<'db, D: DBAccess> {
    inner: rocksdb::Transaction<'db, D>,

    conversations_cf: &'db ColumnFamily,
    conversations_user_cf: &'db ColumnFamily,
    conversations_direct_cf: &'db ColumnFamily,
    conversations_reply_cf: &'db ColumnFamily,

    messages_cf: &'db ColumnFamily,
    messages_conv_cf: &'db ColumnFamily,

    statuses_cf: &'db ColumnFamily,
    statuses_live_cf: &'db ColumnFamily,
    statuses_author_cf: &'db ColumnFamily,
    statuses_expiry_cf: &'db ColumnFamily,
    interactions_cf: &'db ColumnFamily,
    views_cf: &'db ColumnFamily,

    tombola_months_cf: &'db ColumnFamily,
    tombola_date_cf: &'db ColumnFamily,
    tickets_cf: &'db ColumnFamily,
    tickets_month_cf: &'db ColumnFamily,
    tickets_user_month_cf: &'db ColumnFamily,
    tickets_user_cf: &'db ColumnFamily,

    challenges_cf: &'db ColumnFamily,
    challenges_date_cf: &'db ColumnFamily,
    entrepreneurs_cf: &'db ColumnFamily,
    entrepreneurs_challenge_cf: &'db ColumnFamily,
    votes_cf: &'db ColumnFamily,
    votes_intent_cf: &'db ColumnFamily,
    votes_challenge_cf: &'db ColumnFamily,

    idem_cf: &'db ColumnFamily,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn ts_be(at: DateTime<Utc>) -> [u8; 8] {
    (at.timestamp_millis() as u64).to_be_bytes()
}

fn ts_from_be(bytes: &[u8]) -> Result<DateTime<Utc>> {
    let millis = u64::from_be_bytes(super::into_array(bytes));
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid stored timestamp"))
}

fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
    Ok(Uuid::from_slice(bytes)?)
}

/// `user \0 tail` composite key.
fn user_key(user: &str, tail: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(user.len() + 1 + tail.len());
    key.extend_from_slice(user.as_bytes());
    key.push(SEP);
    key.extend_from_slice(tail);
    key
}

/// Canonical key of a direct-conversation pair, order-insensitive.
fn direct_key(a: &str, b: &str) -> Vec<u8> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    user_key(lo, hi.as_bytes())
}

fn date_key(month: u32, year: i32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&(year as u32).to_be_bytes());
    key[4..].copy_from_slice(&month.to_be_bytes());
    key
}

fn interaction_kind_byte(kind: InteractionKind) -> u8 {
    match kind {
        InteractionKind::Like => b'l',
        InteractionKind::Repost => b'r',
        InteractionKind::View => b'v',
    }
}

fn interaction_key(status_id: &Uuid, kind: InteractionKind, user: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(17 + user.len());
    key.extend_from_slice(status_id.as_bytes());
    key.push(interaction_kind_byte(kind));
    key.extend_from_slice(user.as_bytes());
    key
}

impl<'db, D: DBAccess> DBTransaction<'db, D> {
    fn put_doc<T: Serialize>(
        &mut self,
        cf: &ColumnFamily,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        self.inner.put_cf(cf, key, encode(value)?)?;
        Ok(())
    }

    fn get_doc<T: DeserializeOwned>(
        &self,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<Option<T>> {
        match self.inner.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ascending scan of all `(key, value)` pairs under a prefix.
    fn prefix_scan(
        &self,
        cf: &ColumnFamily,
        prefix: &[u8],
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut it = self.inner.raw_iterator_cf(cf);
        it.seek(prefix);
        let mut out = Vec::new();
        while it.valid() {
            let key = it.key().expect("valid iterator returns a key");
            if !key.starts_with(prefix) {
                break;
            }
            let value = it.value().expect("valid iterator returns a value");
            out.push((key.to_vec(), value.to_vec()));
            it.next();
        }
        out
    }

    /// Descending scan under a prefix, with paging applied during
    /// iteration so deep conversations never materialize fully.
    fn prefix_scan_rev(
        &self,
        cf: &ColumnFamily,
        prefix: &[u8],
        offset: u64,
        limit: Option<u64>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&[0xFF; 64]);

        let mut it = self.inner.raw_iterator_cf(cf);
        it.seek_for_prev(&upper);

        let mut out = Vec::new();
        let mut skipped = 0u64;
        while it.valid() {
            let key = it.key().expect("valid iterator returns a key");
            if !key.starts_with(prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                it.prev();
                continue;
            }
            if let Some(limit) = limit {
                if out.len() as u64 >= limit {
                    break;
                }
            }
            let value = it.value().expect("valid iterator returns a value");
            out.push((key.to_vec(), value.to_vec()));
            it.prev();
        }
        out
    }

    fn prefix_count(&self, cf: &ColumnFamily, prefix: &[u8]) -> u64 {
        let mut it = self.inner.raw_iterator_cf(cf);
        it.seek(prefix);
        let mut count = 0;
        while it.valid() {
            let key = it.key().expect("valid iterator returns a key");
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
            it.next();
        }
        count
    }
}

impl<'db, D: DBAccess> Conversations for DBTransaction<'db, D> {
    fn store_conversation(&mut self, c: &Conversation) -> Result<()> {
        let id = *c.id.as_bytes();
        self.put_doc(self.conversations_cf, &id, c)?;

        // Membership and uniqueness indexes are derived from fields that
        // never change after creation, so re-writing them on every upsert
        // is a no-op for existing documents.
        for user in &c.participants {
            self.inner.put_cf(
                self.conversations_user_cf,
                user_key(user, &id),
                [],
            )?;
        }
        match c.kind {
            ConversationKind::Direct => {
                if let [a, b] = c.participants.as_slice() {
                    self.inner.put_cf(
                        self.conversations_direct_cf,
                        direct_key(a, b),
                        id,
                    )?;
                }
            }
            ConversationKind::StatusReply => {
                if let Some(status_id) = &c.status_id {
                    let mut key = status_id.as_bytes().to_vec();
                    key.extend_from_slice(c.initiator_id.as_bytes());
                    self.inner.put_cf(
                        self.conversations_reply_cf,
                        key,
                        id,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn conversation(&self, id: &Uuid) -> Result<Option<Conversation>> {
        self.get_doc(self.conversations_cf, id.as_bytes())
    }

    fn direct_between(&self, a: &str, b: &str) -> Result<Option<Uuid>> {
        match self
            .inner
            .get_cf(self.conversations_direct_cf, direct_key(a, b))?
        {
            Some(bytes) => Ok(Some(uuid_from(&bytes)?)),
            None => Ok(None),
        }
    }

    fn status_reply_conversation(
        &self,
        status_id: &Uuid,
        replyer: &str,
    ) -> Result<Option<Uuid>> {
        let mut key = status_id.as_bytes().to_vec();
        key.extend_from_slice(replyer.as_bytes());
        match self.inner.get_cf(self.conversations_reply_cf, key)? {
            Some(bytes) => Ok(Some(uuid_from(&bytes)?)),
            None => Ok(None),
        }
    }

    fn conversations_of(&self, user: &str) -> Result<Vec<Conversation>> {
        let prefix = user_key(user, &[]);
        let mut out = Vec::new();
        for (key, _) in self.prefix_scan(self.conversations_user_cf, &prefix) {
            let id = uuid_from(&key[prefix.len()..])?;
            if let Some(c) = self.conversation(&id)? {
                out.push(c);
            }
        }
        Ok(out)
    }
}

impl<'db, D: DBAccess> Messages for DBTransaction<'db, D> {
    fn store_message(&mut self, m: &Message) -> Result<()> {
        self.put_doc(self.messages_cf, m.id.as_bytes(), m)?;

        let mut key = m.conversation_id.as_bytes().to_vec();
        key.extend_from_slice(&ts_be(m.created_at));
        key.extend_from_slice(m.id.as_bytes());
        self.inner.put_cf(self.messages_conv_cf, key, [])?;
        Ok(())
    }

    fn message(&self, id: &Uuid) -> Result<Option<Message>> {
        self.get_doc(self.messages_cf, id.as_bytes())
    }

    fn messages_desc(
        &self,
        conversation_id: &Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Message>> {
        let prefix = conversation_id.as_bytes().to_vec();
        let rows = self.prefix_scan_rev(
            self.messages_conv_cf,
            &prefix,
            offset,
            Some(limit),
        );
        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let id = uuid_from(&key[prefix.len() + 8..])?;
            if let Some(m) = self.message(&id)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn message_count(&self, conversation_id: &Uuid) -> Result<u64> {
        Ok(self.prefix_count(
            self.messages_conv_cf,
            conversation_id.as_bytes(),
        ))
    }

    fn unread_messages(
        &self,
        conversation_id: &Uuid,
        reader: &str,
    ) -> Result<Vec<Message>> {
        let prefix = conversation_id.as_bytes().to_vec();
        let mut out = Vec::new();
        for (key, _) in self.prefix_scan(self.messages_conv_cf, &prefix) {
            let id = uuid_from(&key[prefix.len() + 8..])?;
            if let Some(m) = self.message(&id)? {
                if m.is_unread_by(reader) {
                    out.push(m);
                }
            }
        }
        Ok(out)
    }
}

impl<'db, D: DBAccess> Statuses for DBTransaction<'db, D> {
    fn store_status(&mut self, s: &Status) -> Result<()> {
        self.put_doc(self.statuses_cf, s.id.as_bytes(), s)?;

        let mut live_key = ts_be(s.created_at).to_vec();
        live_key.extend_from_slice(s.id.as_bytes());

        let mut author_tail = ts_be(s.created_at).to_vec();
        author_tail.extend_from_slice(s.id.as_bytes());
        let author_key = user_key(&s.author_id, &author_tail);

        let mut expiry_key = ts_be(s.expires_at).to_vec();
        expiry_key.extend_from_slice(s.id.as_bytes());

        if s.deleted {
            self.inner.delete_cf(self.statuses_live_cf, live_key)?;
            self.inner.delete_cf(self.statuses_author_cf, author_key)?;
            self.inner.delete_cf(self.statuses_expiry_cf, expiry_key)?;
        } else {
            self.inner.put_cf(self.statuses_live_cf, live_key, [])?;
            self.inner.put_cf(self.statuses_author_cf, author_key, [])?;
            self.inner.put_cf(self.statuses_expiry_cf, expiry_key, [])?;
        }
        Ok(())
    }

    fn status(&self, id: &Uuid) -> Result<Option<Status>> {
        self.get_doc(self.statuses_cf, id.as_bytes())
    }

    fn live_statuses(&self) -> Result<Vec<Status>> {
        let rows = self.prefix_scan_rev(self.statuses_live_cf, &[], 0, None);
        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let id = uuid_from(&key[8..])?;
            if let Some(s) = self.status(&id)? {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn statuses_by_author(&self, author: &str) -> Result<Vec<Status>> {
        let prefix = user_key(author, &[]);
        let rows =
            self.prefix_scan_rev(self.statuses_author_cf, &prefix, 0, None);
        let mut out = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let id = uuid_from(&key[prefix.len() + 8..])?;
            if let Some(s) = self.status(&id)? {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn expired_status_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let cutoff = ts_be(now);
        let mut out = Vec::new();
        for (key, _) in self.prefix_scan(self.statuses_expiry_cf, &[]) {
            if key[..8] >= cutoff[..] {
                break;
            }
            out.push(uuid_from(&key[8..])?);
        }
        Ok(out)
    }

    fn store_interaction(&mut self, i: &StatusInteraction) -> Result<()> {
        let key = interaction_key(&i.status_id, i.kind, &i.user_id);
        self.put_doc(self.interactions_cf, &key, i)
    }

    fn delete_interaction(
        &mut self,
        status_id: &Uuid,
        user: &str,
        kind: InteractionKind,
    ) -> Result<bool> {
        let key = interaction_key(status_id, kind, user);
        let existed = self.inner.get_cf(self.interactions_cf, &key)?.is_some();
        if existed {
            self.inner.delete_cf(self.interactions_cf, &key)?;
        }
        Ok(existed)
    }

    fn interaction_exists(
        &self,
        status_id: &Uuid,
        user: &str,
        kind: InteractionKind,
    ) -> Result<bool> {
        let key = interaction_key(status_id, kind, user);
        Ok(self.inner.get_cf(self.interactions_cf, key)?.is_some())
    }

    fn interactions_of(
        &self,
        status_id: &Uuid,
        kind: InteractionKind,
    ) -> Result<Vec<StatusInteraction>> {
        let mut prefix = status_id.as_bytes().to_vec();
        prefix.push(interaction_kind_byte(kind));
        self.prefix_scan(self.interactions_cf, &prefix)
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    fn viewer_overlay(
        &self,
        status_ids: &[Uuid],
        user: &str,
    ) -> Result<HashSet<(Uuid, InteractionKind)>> {
        let mut out = HashSet::new();
        for id in status_ids {
            for kind in [InteractionKind::Like, InteractionKind::Repost] {
                if self.interaction_exists(id, user, kind)? {
                    out.insert((*id, kind));
                }
            }
        }
        Ok(out)
    }

    fn last_view_at(
        &self,
        status_id: &Uuid,
        user: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut key = status_id.as_bytes().to_vec();
        key.extend_from_slice(user.as_bytes());
        match self.inner.get_cf(self.views_cf, key)? {
            Some(bytes) => Ok(Some(ts_from_be(&bytes)?)),
            None => Ok(None),
        }
    }

    fn record_view(
        &mut self,
        status_id: &Uuid,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut key = status_id.as_bytes().to_vec();
        key.extend_from_slice(user.as_bytes());
        self.inner.put_cf(self.views_cf, key, ts_be(at))?;
        Ok(())
    }
}

impl<'db, D: DBAccess> Tombolas for DBTransaction<'db, D> {
    fn store_month(&mut self, m: &TombolaMonth) -> Result<()> {
        self.put_doc(self.tombola_months_cf, m.id.as_bytes(), m)?;
        self.inner.put_cf(
            self.tombola_date_cf,
            date_key(m.month, m.year),
            m.id.as_bytes(),
        )?;
        Ok(())
    }

    fn month(&self, id: &Uuid) -> Result<Option<TombolaMonth>> {
        self.get_doc(self.tombola_months_cf, id.as_bytes())
    }

    fn month_id_by_date(&self, month: u32, year: i32) -> Result<Option<Uuid>> {
        match self
            .inner
            .get_cf(self.tombola_date_cf, date_key(month, year))?
        {
            Some(bytes) => Ok(Some(uuid_from(&bytes)?)),
            None => Ok(None),
        }
    }

    fn months_desc(&self) -> Result<Vec<TombolaMonth>> {
        let rows = self.prefix_scan_rev(self.tombola_date_cf, &[], 0, None);
        let mut out = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let id = uuid_from(&value)?;
            if let Some(m) = self.month(&id)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn open_months(&self) -> Result<Vec<TombolaMonth>> {
        let mut out = Vec::new();
        for (_, value) in self.prefix_scan(self.tombola_months_cf, &[]) {
            let m: TombolaMonth = decode(&value)?;
            if m.status == TombolaStatus::Open {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn store_ticket(&mut self, t: &TombolaTicket) -> Result<()> {
        self.put_doc(self.tickets_cf, t.ticket_id.as_bytes(), t)?;

        let mut month_key = t.tombola_month_id.as_bytes().to_vec();
        month_key.extend_from_slice(&t.ticket_number.to_be_bytes());
        self.inner.put_cf(
            self.tickets_month_cf,
            month_key,
            t.ticket_id.as_bytes(),
        )?;

        let mut user_month_key = t.tombola_month_id.as_bytes().to_vec();
        user_month_key.extend_from_slice(t.user_id.as_bytes());
        user_month_key.push(SEP);
        user_month_key.extend_from_slice(&t.user_ticket_index.to_be_bytes());
        self.inner.put_cf(
            self.tickets_user_month_cf,
            user_month_key,
            t.ticket_id.as_bytes(),
        )?;

        let mut user_tail = ts_be(t.created_at).to_vec();
        user_tail.extend_from_slice(t.ticket_id.as_bytes());
        self.inner.put_cf(
            self.tickets_user_cf,
            user_key(&t.user_id, &user_tail),
            t.ticket_id.as_bytes(),
        )?;
        Ok(())
    }

    fn ticket(&self, ticket_id: &str) -> Result<Option<TombolaTicket>> {
        self.get_doc(self.tickets_cf, ticket_id.as_bytes())
    }

    fn tickets_of_month(&self, month_id: &Uuid) -> Result<Vec<TombolaTicket>> {
        let prefix = month_id.as_bytes().to_vec();
        let mut out = Vec::new();
        for (_, value) in self.prefix_scan(self.tickets_month_cf, &prefix) {
            let id = String::from_utf8(value)?;
            if let Some(t) = self.ticket(&id)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn tickets_of_user_in_month(
        &self,
        user: &str,
        month_id: &Uuid,
    ) -> Result<Vec<TombolaTicket>> {
        let mut prefix = month_id.as_bytes().to_vec();
        prefix.extend_from_slice(user.as_bytes());
        prefix.push(SEP);
        let mut out = Vec::new();
        for (_, value) in self.prefix_scan(self.tickets_user_month_cf, &prefix)
        {
            let id = String::from_utf8(value)?;
            if let Some(t) = self.ticket(&id)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn tickets_of_user(&self, user: &str) -> Result<Vec<TombolaTicket>> {
        let prefix = user_key(user, &[]);
        let rows =
            self.prefix_scan_rev(self.tickets_user_cf, &prefix, 0, None);
        let mut out = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let id = String::from_utf8(value)?;
            if let Some(t) = self.ticket(&id)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn ticket_numbers(&self, month_id: &Uuid) -> Result<Vec<u64>> {
        let prefix = month_id.as_bytes().to_vec();
        Ok(self
            .prefix_scan(self.tickets_month_cf, &prefix)
            .into_iter()
            .map(|(key, _)| {
                u64::from_be_bytes(super::into_array(&key[prefix.len()..]))
            })
            .collect())
    }
}

impl<'db, D: DBAccess> Challenges for DBTransaction<'db, D> {
    fn store_challenge(&mut self, c: &ImpactChallenge) -> Result<()> {
        self.put_doc(self.challenges_cf, c.id.as_bytes(), c)?;
        self.inner.put_cf(
            self.challenges_date_cf,
            date_key(c.month, c.year),
            c.id.as_bytes(),
        )?;
        Ok(())
    }

    fn challenge(&self, id: &Uuid) -> Result<Option<ImpactChallenge>> {
        self.get_doc(self.challenges_cf, id.as_bytes())
    }

    fn challenge_id_by_date(
        &self,
        month: u32,
        year: i32,
    ) -> Result<Option<Uuid>> {
        match self
            .inner
            .get_cf(self.challenges_date_cf, date_key(month, year))?
        {
            Some(bytes) => Ok(Some(uuid_from(&bytes)?)),
            None => Ok(None),
        }
    }

    fn challenges_desc(&self) -> Result<Vec<ImpactChallenge>> {
        let rows = self.prefix_scan_rev(self.challenges_date_cf, &[], 0, None);
        let mut out = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let id = uuid_from(&value)?;
            if let Some(c) = self.challenge(&id)? {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn delete_challenge(&mut self, c: &ImpactChallenge) -> Result<()> {
        self.inner.delete_cf(self.challenges_cf, c.id.as_bytes())?;
        self.inner
            .delete_cf(self.challenges_date_cf, date_key(c.month, c.year))?;
        Ok(())
    }

    fn store_entrepreneur(&mut self, e: &Entrepreneur) -> Result<()> {
        self.put_doc(self.entrepreneurs_cf, e.id.as_bytes(), e)?;
        let mut key = e.challenge_id.as_bytes().to_vec();
        key.extend_from_slice(e.id.as_bytes());
        self.inner
            .put_cf(self.entrepreneurs_challenge_cf, key, [])?;
        Ok(())
    }

    fn entrepreneur(&self, id: &Uuid) -> Result<Option<Entrepreneur>> {
        self.get_doc(self.entrepreneurs_cf, id.as_bytes())
    }

    fn entrepreneurs_of(
        &self,
        challenge_id: &Uuid,
    ) -> Result<Vec<Entrepreneur>> {
        let prefix = challenge_id.as_bytes().to_vec();
        let mut out = Vec::new();
        for (key, _) in
            self.prefix_scan(self.entrepreneurs_challenge_cf, &prefix)
        {
            let id = uuid_from(&key[prefix.len()..])?;
            if let Some(e) = self.entrepreneur(&id)? {
                out.push(e);
            }
        }
        Ok(out)
    }

    fn delete_entrepreneur(&mut self, e: &Entrepreneur) -> Result<()> {
        self.inner.delete_cf(self.entrepreneurs_cf, e.id.as_bytes())?;
        let mut key = e.challenge_id.as_bytes().to_vec();
        key.extend_from_slice(e.id.as_bytes());
        self.inner.delete_cf(self.entrepreneurs_challenge_cf, key)?;
        Ok(())
    }

    fn store_vote(&mut self, v: &ChallengeVote) -> Result<()> {
        self.put_doc(self.votes_cf, v.id.as_bytes(), v)?;

        let mut key = v.challenge_id.as_bytes().to_vec();
        key.extend_from_slice(v.id.as_bytes());
        self.inner.put_cf(self.votes_challenge_cf, key, [])?;

        if let Some(intent) = &v.payment_intent_id {
            self.inner.put_cf(
                self.votes_intent_cf,
                intent.as_bytes(),
                v.id.as_bytes(),
            )?;
        }
        Ok(())
    }

    fn vote(&self, id: &Uuid) -> Result<Option<ChallengeVote>> {
        self.get_doc(self.votes_cf, id.as_bytes())
    }

    fn vote_id_by_intent(&self, session_id: &str) -> Result<Option<Uuid>> {
        match self
            .inner
            .get_cf(self.votes_intent_cf, session_id.as_bytes())?
        {
            Some(bytes) => Ok(Some(uuid_from(&bytes)?)),
            None => Ok(None),
        }
    }

    fn votes_of_challenge(
        &self,
        challenge_id: &Uuid,
    ) -> Result<Vec<ChallengeVote>> {
        let prefix = challenge_id.as_bytes().to_vec();
        let mut out = Vec::new();
        for (key, _) in self.prefix_scan(self.votes_challenge_cf, &prefix) {
            let id = uuid_from(&key[prefix.len()..])?;
            if let Some(v) = self.vote(&id)? {
                out.push(v);
            }
        }
        Ok(out)
    }
}

impl<'db, D: DBAccess> Idem for DBTransaction<'db, D> {
    fn idem_record(&self, session_id: &str) -> Result<Option<IdemRecord>> {
        self.get_doc(self.idem_cf, session_id.as_bytes())
    }

    fn store_idem_record(&mut self, r: &IdemRecord) -> Result<()> {
        self.put_doc(self.idem_cf, r.session_id.as_bytes(), r)
    }
}

impl<'db, D: DBAccess> Persist for DBTransaction<'db, D> {
    fn clear_database(&mut self) -> Result<()> {
        let cfs = [
            self.conversations_cf,
            self.conversations_user_cf,
            self.conversations_direct_cf,
            self.conversations_reply_cf,
            self.messages_cf,
            self.messages_conv_cf,
            self.statuses_cf,
            self.statuses_live_cf,
            self.statuses_author_cf,
            self.statuses_expiry_cf,
            self.interactions_cf,
            self.views_cf,
            self.tombola_months_cf,
            self.tombola_date_cf,
            self.tickets_cf,
            self.tickets_month_cf,
            self.tickets_user_month_cf,
            self.tickets_user_cf,
            self.challenges_cf,
            self.challenges_date_cf,
            self.entrepreneurs_cf,
            self.entrepreneurs_challenge_cf,
            self.votes_cf,
            self.votes_intent_cf,
            self.votes_challenge_cf,
            self.idem_cf,
        ];
        for cf in cfs {
            for (key, _) in self.prefix_scan(cf, &[]) {
                self.inner.delete_cf(cf, key)?;
            }
        }
        Ok(())
    }

    fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.inner.rollback()?;
        Ok(())
    }
}

impl<'db, D: DBAccess> core::fmt::Debug for DBTransaction<'db, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DBTransaction").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use palaver_data::conversation::Conversation;
    use palaver_data::message::{Message, MessageKind};
    use palaver_data::status::MediaKind;
    use palaver_data::tombola::TicketSource;

    use super::*;

    fn with_db(test: impl FnOnce(Backend)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db =
            Backend::create_or_open(dir.path(), DatabaseOptions::default());
        test(db);
    }

    #[test]
    fn direct_conversation_index_is_order_insensitive() {
        with_db(|db| {
            let c = Conversation::direct("bob".into(), "alice".into(), Utc::now());
            db.update(|tx| tx.store_conversation(&c)).unwrap();

            db.view(|tx| {
                assert_eq!(
                    tx.direct_between("alice", "bob").unwrap(),
                    Some(c.id)
                );
                assert_eq!(
                    tx.direct_between("bob", "alice").unwrap(),
                    Some(c.id)
                );
                assert_eq!(tx.direct_between("alice", "carl").unwrap(), None);

                let of_alice = tx.conversations_of("alice").unwrap();
                assert_eq!(of_alice.len(), 1);
                assert_eq!(of_alice[0].id, c.id);
            });
        });
    }

    #[test]
    fn messages_page_newest_first() {
        with_db(|db| {
            let conv = Uuid::new_v4();
            let base = Utc::now();
            db.update(|tx| {
                for i in 0..5i64 {
                    let m = Message::new(
                        conv,
                        "alice".into(),
                        MessageKind::Text,
                        format!("m{i}"),
                        base + chrono::Duration::seconds(i),
                    );
                    tx.store_message(&m)?;
                }
                Ok(())
            })
            .unwrap();

            db.view(|tx| {
                let page = tx.messages_desc(&conv, 0, 2).unwrap();
                let contents: Vec<_> =
                    page.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, ["m4", "m3"]);

                let page = tx.messages_desc(&conv, 2, 2).unwrap();
                let contents: Vec<_> =
                    page.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, ["m2", "m1"]);

                assert_eq!(tx.message_count(&conv).unwrap(), 5);
            });
        });
    }

    #[test]
    fn soft_deleted_status_leaves_the_live_index() {
        with_db(|db| {
            let now = Utc::now();
            let mut s = test_status(now);
            db.update(|tx| tx.store_status(&s)).unwrap();
            db.view(|tx| {
                assert_eq!(tx.live_statuses().unwrap().len(), 1);
            });

            s.deleted = true;
            s.deleted_at = Some(now);
            db.update(|tx| tx.store_status(&s)).unwrap();
            db.view(|tx| {
                assert!(tx.live_statuses().unwrap().is_empty());
                // The document itself survives for direct lookups.
                assert!(tx.status(&s.id).unwrap().unwrap().deleted);
            });
        });
    }

    #[test]
    fn expired_ids_respect_the_cutoff() {
        with_db(|db| {
            let now = Utc::now();
            let mut fresh = test_status(now);
            fresh.expires_at = now + chrono::Duration::hours(10);
            let mut stale = test_status(now);
            stale.expires_at = now - chrono::Duration::hours(1);

            db.update(|tx| {
                tx.store_status(&fresh)?;
                tx.store_status(&stale)
            })
            .unwrap();

            db.view(|tx| {
                let expired = tx.expired_status_ids(now).unwrap();
                assert_eq!(expired, vec![stale.id]);
            });
        });
    }

    #[test]
    fn ticket_indexes_cover_month_and_user() {
        with_db(|db| {
            let month_id = Uuid::new_v4();
            let now = Utc::now();
            db.update(|tx| {
                for n in 1..=3u64 {
                    tx.store_ticket(&TombolaTicket {
                        ticket_id: format!("TICKET{n:06}"),
                        user_id: "u1".into(),
                        tombola_month_id: month_id,
                        ticket_number: n,
                        weight: 1.0,
                        user_ticket_index: n as u32,
                        source: TicketSource::DirectPurchase,
                        payment_intent_id: format!("sess-{n}"),
                        challenge_vote_id: None,
                        created_at: now,
                    })?;
                }
                Ok(())
            })
            .unwrap();

            db.view(|tx| {
                assert_eq!(tx.ticket_numbers(&month_id).unwrap(), vec![1, 2, 3]);
                assert_eq!(
                    tx.tickets_of_user_in_month("u1", &month_id)
                        .unwrap()
                        .len(),
                    3
                );
                assert_eq!(tx.tickets_of_user("u1").unwrap().len(), 3);
                assert!(tx
                    .tickets_of_user_in_month("u2", &month_id)
                    .unwrap()
                    .is_empty());
            });
        });
    }

    #[test]
    fn vote_intent_lookup() {
        with_db(|db| {
            let now = Utc::now();
            let vote = palaver_data::challenge::ChallengeVote {
                id: Uuid::new_v4(),
                challenge_id: Uuid::new_v4(),
                entrepreneur_id: Uuid::new_v4(),
                user_id: Some("u1".into()),
                amount_paid: 600,
                vote_quantity: 3,
                kind: palaver_data::challenge::VoteKind::Vote,
                payment_status: palaver_data::challenge::PaymentStatus::Pending,
                payment_intent_id: Some("sess-42".into()),
                tombola_ticket_ids: vec![],
                tickets_generated: false,
                ticket_generation_error: None,
                created_at: now,
                updated_at: now,
            };
            db.update(|tx| tx.store_vote(&vote)).unwrap();

            db.view(|tx| {
                assert_eq!(
                    tx.vote_id_by_intent("sess-42").unwrap(),
                    Some(vote.id)
                );
                assert_eq!(tx.vote_id_by_intent("sess-43").unwrap(), None);
            });
        });
    }

    fn test_status(now: DateTime<Utc>) -> Status {
        Status {
            id: Uuid::new_v4(),
            author_id: "author".into(),
            category: "divers".into(),
            content: "hello".into(),
            media_kind: MediaKind::Text,
            media_url: None,
            video_duration_secs: None,
            country: None,
            city: None,
            region: None,
            counts: Default::default(),
            moderation: None,
            content_warned: false,
            approved: true,
            expires_at: now + chrono::Duration::hours(24),
            deleted: false,
            deleted_at: None,
            is_repost: false,
            original_status_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
