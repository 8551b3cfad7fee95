// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use async_trait::async_trait;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};

use super::{EndpointConf, ServiceEnvelope, UpstreamError};

const SERVICE: &str = "payments";

pub const PAYMENT_TYPE_CHALLENGE_VOTE: &str = "CHALLENGE_VOTE";
pub const PAYMENT_TYPE_TOMBOLA_TICKET: &str = "TOMBOLA_TICKET";

/// Webhook status value confirmations act on.
pub const STATUS_SUCCEEDED: &str = "SUCCEEDED";
pub const STATUS_FAILED: &str = "FAILED";

pub const CURRENCY: &str = "XAF";

/// Checkout-intent creation request. `metadata` is round-tripped verbatim
/// into the confirmation webhook.
#[derive(Clone, Debug, Serialize)]
pub struct CreateIntent {
    pub amount: u64,
    pub currency: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub payment_type: &'static str,
    pub metadata: serde_json::Value,
    pub originating_service: &'static str,
    /// Webhook path the gateway calls back on completion.
    pub callback_path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PaymentIntent {
    pub session_id: String,
    pub checkout_url: String,
}

/// Destination of an internal ledger deposit.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DepositTarget {
    User { user_id: UserId },
    Account { account_id: String },
}

#[async_trait]
pub trait PaymentsClient: Send + Sync + 'static {
    async fn create_intent(
        &self,
        req: &CreateIntent,
    ) -> Result<PaymentIntent, UpstreamError>;

    /// Moves already-collected funds to an internal account or a user
    /// wallet. Returns the ledger transaction id.
    async fn internal_deposit(
        &self,
        target: &DepositTarget,
        amount: u64,
        reason: &str,
    ) -> Result<String, UpstreamError>;
}

pub struct HttpPayments {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPayments {
    pub fn new(conf: &EndpointConf, secret: &str) -> Self {
        Self {
            http: super::build_http(SERVICE, conf.timeout, secret),
            base_url: conf.base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Serialize)]
struct DepositRequest<'a> {
    target: &'a DepositTarget,
    amount: u64,
    currency: &'static str,
    reason: &'a str,
}

#[derive(Deserialize)]
struct DepositReceipt {
    transaction_id: String,
}

#[async_trait]
impl PaymentsClient for HttpPayments {
    async fn create_intent(
        &self,
        req: &CreateIntent,
    ) -> Result<PaymentIntent, UpstreamError> {
        let envelope: ServiceEnvelope<PaymentIntent> = self
            .http
            .post(format!("{}/internal/intents", self.base_url))
            .json(req)
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

    async fn internal_deposit(
        &self,
        target: &DepositTarget,
        amount: u64,
        reason: &str,
    ) -> Result<String, UpstreamError> {
        let envelope: ServiceEnvelope<DepositReceipt> = self
            .http
            .post(format!("{}/internal/deposits", self.base_url))
            .json(&DepositRequest {
                target,
                amount,
                currency: CURRENCY,
                reason,
            })
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;
        Ok(envelope.into_data(SERVICE)?.transaction_id)
    }
}
