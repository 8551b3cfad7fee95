// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

//! In-memory collaborator doubles and store fixtures shared by the core
//! tests (and, behind the `test-utils` feature, by dependent crates).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use palaver_data::directory::UserSnapshot;
use palaver_data::events::Notification;
use palaver_data::status::ModerationOutcome;
use palaver_data::UserId;
use parking_lot::Mutex;

use crate::clients::payments::{CreateIntent, DepositTarget, PaymentIntent};
use crate::clients::storage::{SignedUrl, SIGNED_URL_TTL_SECS};
use crate::clients::{
    moderation::MediaRef, DirectoryClient, ModerationClient, NotifierClient,
    PaymentsClient, StorageClient, UpstreamError,
};
use crate::database::rocksdb::Backend;
use crate::database::{DatabaseOptions, DB};

/// A throwaway RocksDB backend. Keep the `TempDir` alive for as long as
/// the backend is used.
pub fn temp_backend() -> (tempfile::TempDir, Backend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Backend::create_or_open(dir.path(), DatabaseOptions::default());
    (dir, db)
}

/// Directory double backed by a fixed user table and referral pairs.
#[derive(Default)]
pub struct StaticDirectory {
    users: Mutex<HashMap<UserId, UserSnapshot>>,
    referrals: Mutex<HashSet<(UserId, UserId)>>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_user(&self, user: UserSnapshot) {
        self.users.lock().insert(user.id.clone(), user);
    }

    pub fn insert_plain_user(&self, id: &str) {
        self.insert_user(UserSnapshot {
            id: id.to_owned(),
            name: format!("User {id}"),
            avatar_url: None,
            region: None,
            role: Default::default(),
        });
    }

    pub fn link_referral(&self, a: &str, b: &str) {
        let pair = ordered(a, b);
        self.referrals.lock().insert(pair);
    }
}

fn ordered(a: &str, b: &str) -> (UserId, UserId) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

#[async_trait]
impl DirectoryClient for StaticDirectory {
    async fn users(
        &self,
        ids: &[UserId],
    ) -> Result<Vec<UserSnapshot>, UpstreamError> {
        let table = self.users.lock();
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn has_referral_link(
        &self,
        a: &str,
        b: &str,
    ) -> Result<bool, UpstreamError> {
        Ok(self.referrals.lock().contains(&ordered(a, b)))
    }
}

/// Payments double that records every intent and deposit and hands out
/// deterministic session/transaction ids.
#[derive(Default)]
pub struct RecordingPayments {
    pub intents: Mutex<Vec<CreateIntent>>,
    pub deposits: Mutex<Vec<(DepositTarget, u64, String)>>,
    counter: AtomicU64,
    pub fail_deposits: AtomicBool,
}

impl RecordingPayments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_session_id(&self) -> Option<String> {
        let n = self.counter.load(Ordering::SeqCst);
        (n > 0).then(|| format!("sess-{n}"))
    }
}

#[async_trait]
impl PaymentsClient for RecordingPayments {
    async fn create_intent(
        &self,
        req: &CreateIntent,
    ) -> Result<PaymentIntent, UpstreamError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.intents.lock().push(req.clone());
        Ok(PaymentIntent {
            session_id: format!("sess-{n}"),
            checkout_url: format!("https://pay.example/checkout/sess-{n}"),
        })
    }

    async fn internal_deposit(
        &self,
        target: &DepositTarget,
        amount: u64,
        reason: &str,
    ) -> Result<String, UpstreamError> {
        if self.fail_deposits.load(Ordering::SeqCst) {
            return Err(UpstreamError::status("payments", 503));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.deposits
            .lock()
            .push((target.clone(), amount, reason.to_owned()));
        Ok(format!("txn-{n}"))
    }
}

/// Storage double: uploads land in memory, signed URLs are synthesized.
#[derive(Default)]
pub struct MemoryStorage {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub fail_signing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, UpstreamError> {
        self.uploads
            .lock()
            .push((name.to_owned(), mime_type.to_owned(), bytes.len()));
        Ok(name.to_owned())
    }

    async fn signed_url(
        &self,
        path: &str,
    ) -> Result<SignedUrl, UpstreamError> {
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(UpstreamError::status("storage", 503));
        }
        Ok(SignedUrl {
            url: format!("https://signed.example/{path}?sig=test"),
            expires_in_secs: SIGNED_URL_TTL_SECS,
        })
    }

    async fn signed_urls(
        &self,
        paths: &[String],
    ) -> Result<HashMap<String, String>, UpstreamError> {
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(UpstreamError::status("storage", 503));
        }
        Ok(paths
            .iter()
            .map(|p| {
                (p.clone(), format!("https://signed.example/{p}?sig=test"))
            })
            .collect())
    }
}

/// Notifier double recording every dispatched notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl NotifierClient for RecordingNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), UpstreamError> {
        self.sent.lock().push(n.clone());
        Ok(())
    }
}

/// Moderation double with a scripted outcome.
pub struct StaticModeration {
    outcome: Mutex<ModerationOutcome>,
    pub fail: AtomicBool,
}

impl StaticModeration {
    pub fn allowing() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(ModerationOutcome::allow()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_outcome(&self, outcome: ModerationOutcome) {
        *self.outcome.lock() = outcome;
    }
}

#[async_trait]
impl ModerationClient for StaticModeration {
    async fn moderate(
        &self,
        _media: MediaRef<'_>,
    ) -> Result<ModerationOutcome, UpstreamError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UpstreamError::status("moderation", 500));
        }
        Ok(self.outcome.lock().clone())
    }
}
