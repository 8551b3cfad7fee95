// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

//! Outbound HTTP clients for the external collaborators: Directory,
//! Payments, Storage, Notifier and Moderation. Every call carries the
//! shared service secret and a bounded timeout; callers must not hold
//! locks across them.

pub mod directory;
pub mod moderation;
pub mod notifier;
pub mod payments;
pub mod storage;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use directory::DirectoryClient;
pub use moderation::ModerationClient;
pub use notifier::NotifierClient;
pub use payments::PaymentsClient;
pub use storage::StorageClient;

/// Header identifying this process on service-to-service calls.
pub const SERVICE_NAME_HEADER: &str = "x-service-name";
pub const SERVICE_NAME: &str = "palaver-core";

/// Failure of an outbound collaborator call.
#[derive(Debug, Error)]
#[error("{service} call failed: {kind}")]
pub struct UpstreamError {
    pub service: &'static str,
    pub kind: UpstreamKind,
}

#[derive(Debug, Error)]
pub enum UpstreamKind {
    #[error("timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            UpstreamKind::Timeout
        } else if err.is_decode() {
            UpstreamKind::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamKind::Status(status.as_u16())
        } else {
            UpstreamKind::Transport(err.to_string())
        };
        Self { service, kind }
    }

    pub fn status(service: &'static str, code: u16) -> Self {
        Self {
            service,
            kind: UpstreamKind::Status(code),
        }
    }

    pub fn decode(service: &'static str, msg: impl Into<String>) -> Self {
        Self {
            service,
            kind: UpstreamKind::Decode(msg.into()),
        }
    }
}

/// Connection details of one collaborator endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConf {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for EndpointConf {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:0".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Envelope every collaborator wraps its responses in.
#[derive(Debug, Deserialize)]
pub(crate) struct ServiceEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ServiceEnvelope<T> {
    /// Unwraps `data`, turning an unsuccessful envelope into an error.
    pub fn into_data(
        self,
        service: &'static str,
    ) -> Result<T, UpstreamError> {
        if !self.success {
            return Err(UpstreamError::decode(
                service,
                self.message
                    .unwrap_or_else(|| "collaborator reported failure".into()),
            ));
        }
        self.data
            .ok_or_else(|| UpstreamError::decode(service, "missing data"))
    }
}

/// Builds a reqwest client preconfigured with the shared secret, service
/// identification and the endpoint's timeout.
pub(crate) fn build_http(
    service: &'static str,
    timeout: Duration,
    secret: &str,
) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(mut auth) = reqwest::header::HeaderValue::from_str(&format!(
        "Bearer {secret}"
    )) {
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
    }
    if let Ok(name) = reqwest::header::HeaderValue::from_str(SERVICE_NAME) {
        headers.insert(SERVICE_NAME_HEADER, name);
    }
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .unwrap_or_else(|e| panic!("cannot build {service} client: {e}"))
}
