// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ServiceEnvelope, UpstreamError};

const SERVICE: &str = "storage";

/// Validity of every signed URL this process hands out.
pub const SIGNED_URL_TTL_SECS: u64 = 3600;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConf {
    pub base_url: String,
    /// Private bucket uploads and reads go to.
    pub bucket: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Uploads move whole media buffers and get a far larger timeout.
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:0".into(),
            bucket: "palaver-private".into(),
            timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Private object store. Paths returned by `upload` are opaque and only
/// usable through a signed URL.
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// Stores a buffer under the generated object name, returning the
    /// opaque path.
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, UpstreamError>;

    async fn signed_url(&self, path: &str) -> Result<SignedUrl, UpstreamError>;

    /// Batch variant used by listings; missing entries mean the object is
    /// gone and the caller continues without a URL.
    async fn signed_urls(
        &self,
        paths: &[String],
    ) -> Result<HashMap<String, String>, UpstreamError>;
}

pub struct HttpStorage {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    upload_timeout: Duration,
}

impl HttpStorage {
    pub fn new(conf: &StorageConf, secret: &str) -> Self {
        Self {
            http: super::build_http(SERVICE, conf.timeout, secret),
            base_url: conf.base_url.trim_end_matches('/').to_owned(),
            bucket: conf.bucket.clone(),
            upload_timeout: conf.upload_timeout,
        }
    }
}

#[derive(Deserialize)]
struct UploadReceipt {
    path: String,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    bucket: &'a str,
    paths: &'a [String],
    expires_in_secs: u64,
}

#[async_trait]
impl StorageClient for HttpStorage {
    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, UpstreamError> {
        let envelope: ServiceEnvelope<UploadReceipt> = self
            .http
            .post(format!(
                "{}/internal/buckets/{}/objects/{name}",
                self.base_url, self.bucket
            ))
            .timeout(self.upload_timeout)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(envelope.into_data(SERVICE)?.path)
    }

    async fn signed_url(
        &self,
        path: &str,
    ) -> Result<SignedUrl, UpstreamError> {
        let urls = self.signed_urls(&[path.to_owned()]).await?;
        match urls.into_iter().next() {
            Some((_, url)) => Ok(SignedUrl {
                url,
                expires_in_secs: SIGNED_URL_TTL_SECS,
            }),
            None => Err(UpstreamError::status(SERVICE, 404)),
        }
    }

    async fn signed_urls(
        &self,
        paths: &[String],
    ) -> Result<HashMap<String, String>, UpstreamError> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let envelope: ServiceEnvelope<HashMap<String, String>> = self
            .http
            .post(format!("{}/internal/signed-urls", self.base_url))
            .json(&SignRequest {
                bucket: &self.bucket,
                paths,
                expires_in_secs: SIGNED_URL_TTL_SECS,
            })
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
}
