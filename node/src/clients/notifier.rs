// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::sync::Arc;

use async_trait::async_trait;
use palaver_data::events::Notification;
use tracing::warn;

use super::{EndpointConf, UpstreamError};

const SERVICE: &str = "notifier";

/// Dispatch of user notifications. Strictly advisory: the caller's
/// request succeeds whether or not the notifier does.
#[async_trait]
pub trait NotifierClient: Send + Sync + 'static {
    async fn notify(&self, n: &Notification) -> Result<(), UpstreamError>;
}

/// Fire-and-forget delivery. Failures are logged and swallowed.
pub fn notify_detached(client: Arc<dyn NotifierClient>, n: Notification) {
    tokio::spawn(async move {
        if let Err(e) = client.notify(&n).await {
            warn!(event = "notification dropped", user = %n.user_id, %e);
        }
    });
}

pub struct HttpNotifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(conf: &EndpointConf, secret: &str) -> Self {
        Self {
            http: super::build_http(SERVICE, conf.timeout, secret),
            base_url: conf.base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl NotifierClient for HttpNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), UpstreamError> {
        self.http
            .post(format!("{}/internal/notifications", self.base_url))
            .json(n)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(())
    }
}
