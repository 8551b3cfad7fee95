// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use palaver_data::status::{ModerationAction, ModerationOutcome};
use serde::{Deserialize, Serialize};

use super::{ServiceEnvelope, UpstreamError};

const SERVICE: &str = "moderation";

/// Media handed to the moderation backend, by signed URL.
#[derive(Clone, Copy, Debug)]
pub enum MediaRef<'a> {
    Image(&'a str),
    Video(&'a str),
}

#[async_trait]
pub trait ModerationClient: Send + Sync + 'static {
    async fn moderate(
        &self,
        media: MediaRef<'_>,
    ) -> Result<ModerationOutcome, UpstreamError>;
}

/// Which concrete adapter to run. Selected once at startup; there is no
/// runtime discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationBackendKind {
    SaasImage,
    SaasVideo,
    LocalImage,
    #[default]
    Disabled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConf {
    pub backend: ModerationBackendKind,
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Max label score at or above which media is rejected outright.
    pub block_threshold: f64,
    /// Max label score at or above which media is published behind a
    /// warning.
    pub warn_threshold: f64,
}

impl Default for ModerationConf {
    fn default() -> Self {
        Self {
            backend: ModerationBackendKind::Disabled,
            base_url: "http://127.0.0.1:0".into(),
            timeout: Duration::from_secs(30),
            block_threshold: 0.85,
            warn_threshold: 0.6,
        }
    }
}

/// Builds the adapter the configuration selects.
pub fn build(conf: &ModerationConf, secret: &str) -> Arc<dyn ModerationClient> {
    match conf.backend {
        ModerationBackendKind::Disabled => Arc::new(DisabledModeration),
        ModerationBackendKind::SaasImage
        | ModerationBackendKind::SaasVideo
        | ModerationBackendKind::LocalImage => {
            Arc::new(HttpModeration::new(conf, secret))
        }
    }
}

/// No-op adapter: everything is allowed.
pub struct DisabledModeration;

#[async_trait]
impl ModerationClient for DisabledModeration {
    async fn moderate(
        &self,
        _media: MediaRef<'_>,
    ) -> Result<ModerationOutcome, UpstreamError> {
        Ok(ModerationOutcome::allow())
    }
}

/// SaaS and local-sidecar scanning share one HTTP shape; only the scan
/// path differs per backend.
pub struct HttpModeration {
    http: reqwest::Client,
    base_url: String,
    backend: ModerationBackendKind,
    block_threshold: f64,
    warn_threshold: f64,
}

impl HttpModeration {
    pub fn new(conf: &ModerationConf, secret: &str) -> Self {
        Self {
            http: super::build_http(SERVICE, conf.timeout, secret),
            base_url: conf.base_url.trim_end_matches('/').to_owned(),
            backend: conf.backend,
            block_threshold: conf.block_threshold,
            warn_threshold: conf.warn_threshold,
        }
    }

    fn scan_path(&self, media: &MediaRef<'_>) -> &'static str {
        match (self.backend, media) {
            (ModerationBackendKind::LocalImage, _) => "/scan",
            (_, MediaRef::Video(_)) => "/v1/videos/scan",
            (_, MediaRef::Image(_)) => "/v1/images/scan",
        }
    }
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ScanResult {
    #[serde(default)]
    scores: Vec<(String, f64)>,
    #[serde(default)]
    reason: Option<String>,
}

/// Maps raw label scores to an action using the configured thresholds.
pub fn outcome_from_scores(
    scores: Vec<(String, f64)>,
    reason: Option<String>,
    block_threshold: f64,
    warn_threshold: f64,
) -> ModerationOutcome {
    let worst = scores
        .iter()
        .cloned()
        .max_by(|(_, a), (_, b)| a.total_cmp(b));

    let (action, reason) = match worst {
        Some((label, score)) if score >= block_threshold => (
            ModerationAction::Block,
            Some(reason.unwrap_or_else(|| format!("flagged as {label}"))),
        ),
        Some((label, score)) if score >= warn_threshold => (
            ModerationAction::Warn,
            Some(reason.unwrap_or_else(|| format!("possible {label}"))),
        ),
        _ => (ModerationAction::Allow, None),
    };

    ModerationOutcome {
        action,
        reason,
        scores,
    }
}

#[async_trait]
impl ModerationClient for HttpModeration {
    async fn moderate(
        &self,
        media: MediaRef<'_>,
    ) -> Result<ModerationOutcome, UpstreamError> {
        let url = match media {
            MediaRef::Image(u) | MediaRef::Video(u) => u,
        };
        let envelope: ServiceEnvelope<ScanResult> = self
            .http
            .post(format!("{}{}", self.base_url, self.scan_path(&media)))
            .json(&ScanRequest { url })
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        let scan = envelope.into_data(SERVICE)?;
        Ok(outcome_from_scores(
            scan.scores,
            scan.reason,
            self.block_threshold,
            self.warn_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_partition_the_score_range() {
        let blocked = outcome_from_scores(
            vec![("nudity".into(), 0.92)],
            None,
            0.85,
            0.6,
        );
        assert_eq!(blocked.action, ModerationAction::Block);
        assert!(blocked.reason.as_deref().unwrap().contains("nudity"));

        let warned = outcome_from_scores(
            vec![("violence".into(), 0.7), ("spam".into(), 0.1)],
            None,
            0.85,
            0.6,
        );
        assert_eq!(warned.action, ModerationAction::Warn);

        let clean =
            outcome_from_scores(vec![("spam".into(), 0.2)], None, 0.85, 0.6);
        assert_eq!(clean.action, ModerationAction::Allow);
        assert!(clean.reason.is_none());
    }

    #[test]
    fn provider_reason_wins_over_the_generated_one() {
        let blocked = outcome_from_scores(
            vec![("weapons".into(), 0.9)],
            Some("weapons are not allowed".into()),
            0.85,
            0.6,
        );
        assert_eq!(
            blocked.reason.as_deref(),
            Some("weapons are not allowed")
        );
    }
}
