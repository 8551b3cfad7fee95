// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashMap;

use async_trait::async_trait;
use palaver_data::directory::UserSnapshot;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};

use super::{EndpointConf, ServiceEnvelope, UpstreamError};

const SERVICE: &str = "directory";

/// User-directory lookups. Batch-oriented: feeds resolve dozens of author
/// snapshots per page.
#[async_trait]
pub trait DirectoryClient: Send + Sync + 'static {
    /// Snapshots for the given ids. Unknown ids are silently absent from
    /// the result.
    async fn users(
        &self,
        ids: &[UserId],
    ) -> Result<Vec<UserSnapshot>, UpstreamError>;

    /// Whether a direct referral relationship exists between two users,
    /// in either direction.
    async fn has_referral_link(
        &self,
        a: &str,
        b: &str,
    ) -> Result<bool, UpstreamError>;

    async fn users_by_id(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserSnapshot>, UpstreamError> {
        Ok(self
            .users(ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect())
    }
}

pub struct HttpDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(conf: &EndpointConf, secret: &str) -> Self {
        Self {
            http: super::build_http(SERVICE, conf.timeout, secret),
            base_url: conf.base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    ids: &'a [UserId],
}

#[derive(Deserialize)]
struct ReferralLink {
    linked: bool,
}

#[async_trait]
impl DirectoryClient for HttpDirectory {
    async fn users(
        &self,
        ids: &[UserId],
    ) -> Result<Vec<UserSnapshot>, UpstreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let envelope: ServiceEnvelope<Vec<UserSnapshot>> = self
            .http
            .post(format!("{}/internal/users/batch", self.base_url))
            .json(&BatchRequest { ids })
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        envelope.into_data(SERVICE)
    }

    async fn has_referral_link(
        &self,
        a: &str,
        b: &str,
    ) -> Result<bool, UpstreamError> {
        let envelope: ServiceEnvelope<ReferralLink> = self
            .http
            .get(format!("{}/internal/referrals/link", self.base_url))
            .query(&[("from", a), ("to", b)])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(envelope.into_data(SERVICE)?.linked)
    }
}
