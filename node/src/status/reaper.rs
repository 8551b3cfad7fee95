// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::clock::Clock;
use crate::database::{self, Statuses};
use crate::LongLivedService;

/// Periodically soft-deletes statuses whose expiry has passed. Readers
/// filter on expiry anyway; the reaper only keeps the live set small.
pub struct StatusReaperSrv {
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl StatusReaperSrv {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self { clock, interval }
    }

    /// One reaping pass; returns the number of statuses retired.
    pub fn reap<DB: database::DB>(
        db: &DB,
        now: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<usize> {
        db.update(|tx| {
            let expired = tx.expired_status_ids(now)?;
            let count = expired.len();
            for id in expired {
                if let Some(mut status) = tx.status(&id)? {
                    status.deleted = true;
                    status.deleted_at = Some(now);
                    status.updated_at = now;
                    tx.store_status(&status)?;
                }
            }
            Ok(count)
        })
    }
}

#[async_trait]
impl<DB: database::DB> LongLivedService<DB> for StatusReaperSrv {
    async fn execute(&mut self, db: Arc<RwLock<DB>>) -> anyhow::Result<usize> {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tick.tick().await;
            let now = self.clock.now();
            match Self::reap(&*db.read().await, now) {
                Ok(0) => {}
                Ok(reaped) => info!(event = "statuses_reaped", reaped),
                Err(e) => tracing::error!(event = "status_reap_failed", %e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "status_reaper"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use palaver_data::directory::Role;
    use palaver_data::status::StatusFilter;

    use super::super::{NewStatus, StatusCore, StatusParams};
    use super::*;
    use crate::chat::{ChatParams, ConversationCore};
    use crate::clock::ManualClock;
    use crate::realtime::Bus;
    use crate::test_utils::{
        temp_backend, MemoryStorage, StaticDirectory, StaticModeration,
    };

    #[tokio::test]
    async fn reaper_retires_expired_statuses() {
        let (_guard, db) = temp_backend();
        let db = Arc::new(RwLock::new(db));
        let clock = ManualClock::at("2026-03-05T12:00:00Z".parse().unwrap());
        let bus = Bus::new();
        let directory = StaticDirectory::new();
        directory.insert_plain_user("author");

        let conversations = Arc::new(ConversationCore::new(
            db.clone(),
            directory.clone(),
            bus.clone(),
            Arc::new(clock.clone()),
            ChatParams::default(),
        ));
        let statuses = StatusCore::new(
            db.clone(),
            conversations,
            directory,
            MemoryStorage::new(),
            StaticModeration::allowing(),
            bus,
            Arc::new(clock.clone()),
            StatusParams::default(),
        );

        statuses
            .create(
                "author",
                Role::User,
                NewStatus {
                    category: "divers".into(),
                    content: "bientôt parti".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        clock.advance(ChronoDuration::hours(25));
        let reaped =
            StatusReaperSrv::reap(&*db.read().await, clock.now()).unwrap();
        assert_eq!(reaped, 1);

        // A second pass finds nothing left.
        let reaped =
            StatusReaperSrv::reap(&*db.read().await, clock.now()).unwrap();
        assert_eq!(reaped, 0);

        let feed = statuses
            .feed("author", &StatusFilter::default(), 1, 20)
            .await
            .unwrap();
        assert!(feed.items.is_empty());
    }
}
