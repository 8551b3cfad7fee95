// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod challenge;
pub mod chat;
pub mod clients;
pub mod clock;
pub mod database;
pub mod error;
pub mod presence;
pub mod realtime;
pub mod status;
pub mod tombola;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info};

/// A background worker owning its own loop: reapers, sweepers and the
/// like. Spawned once at startup and expected to run until shutdown.
#[async_trait]
pub trait LongLivedService<DB: database::DB>: Send + Sync {
    async fn execute(&mut self, db: Arc<RwLock<DB>>) -> anyhow::Result<usize>;

    /// Returns service name.
    fn name(&self) -> &'static str;
}

/// Owns the shared persistence handle and supervises the long-lived
/// services. Request handlers get their own clone of the database handle
/// through [`Node::database`].
pub struct Node<DB: database::DB> {
    database: Arc<RwLock<DB>>,
}

impl<DB: database::DB> Clone for Node<DB> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
        }
    }
}

impl<DB: database::DB> Node<DB> {
    pub fn new(db: DB) -> Self {
        Self {
            database: Arc::new(RwLock::new(db)),
        }
    }

    pub fn database(&self) -> Arc<RwLock<DB>> {
        self.database.clone()
    }

    /// Sets up and runs a list of services, join-waiting for their
    /// termination. A SIGINT aborts every service and returns.
    pub async fn spawn_all(
        &self,
        service_list: Vec<Box<dyn LongLivedService<DB>>>,
    ) -> anyhow::Result<()> {
        let mut set = JoinSet::new();
        set.spawn(async {
            signal(SignalKind::interrupt())?.recv().await;
            Ok(ABORT_CODE)
        });

        for mut s in service_list.into_iter() {
            let db = self.database.clone();
            let name = s.name();
            info!(event = "starting service", name);

            set.spawn(async move { s.execute(db).await });
        }

        while let Some(res) = set.join_next().await {
            if let Ok(r) = res {
                match r {
                    Ok(rcode) => {
                        if rcode == ABORT_CODE {
                            set.abort_all();
                        }
                    }
                    Err(e) => {
                        error!("service terminated with err {}", e);
                    }
                }
            }
        }

        info!("shutdown ...");

        Ok(())
    }
}

/// Result code a service returns to request a full shutdown.
pub const ABORT_CODE: usize = 2;
