// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::sync::Arc;

use metrics::counter;
use palaver_data::challenge::{
    ChallengeStatus, ChallengeVote, PaymentStatus, VoteKind,
};
use palaver_data::idem::IdemRecord;
use palaver_data::tombola::{
    opaque_ticket_id, ticket_weight, TicketSource, TombolaTicket,
};
use palaver_data::UserId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use super::ChallengeParams;
use crate::clients::payments::{
    CreateIntent, PaymentsClient, CURRENCY, PAYMENT_TYPE_CHALLENGE_VOTE,
    STATUS_FAILED, STATUS_SUCCEEDED,
};
use crate::clients::SERVICE_NAME;
use crate::clock::Clock;
use crate::database::{self, Challenges, Idem, Tombolas};
use crate::error::{CoreError, CoreResult};
use crate::tombola::TombolaParams;

/// Intent metadata for vote and support payments; round-tripped through
/// the gateway into the confirmation webhook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VoteIntentMetadata {
    pub challenge_id: Uuid,
    pub entrepreneur_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub vote_id: Uuid,
    pub vote_type: VoteKind,
    pub vote_quantity: u64,
    pub tickets_to_generate: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct VoteCheckout {
    pub vote_id: Uuid,
    pub session_id: String,
    pub checkout_url: String,
    pub vote_quantity: u64,
    /// Tickets this payment will mint on confirmation (0 for support).
    pub ticket_quantity: u64,
}

/// How much tombola room a user has left this month.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TicketAllowance {
    pub max: u32,
    pub used: u32,
    pub available: u32,
}

/// Result of a webhook delivery.
#[derive(Clone, Debug)]
pub enum ConfirmOutcome {
    /// First delivery: counters moved, tickets minted where applicable.
    Completed(Box<ChallengeVote>),
    /// Retried delivery; nothing changed.
    AlreadyProcessed(Box<ChallengeVote>),
    /// The gateway reported a failed payment.
    Failed(Box<ChallengeVote>),
}

impl ConfirmOutcome {
    pub fn vote(&self) -> &ChallengeVote {
        match self {
            Self::Completed(v) | Self::AlreadyProcessed(v) | Self::Failed(v) => v,
        }
    }
}

/// Vote/support initiation and the idempotent payment-confirmation path,
/// including weighted ticket minting under the monthly cap.
pub struct VoteCore<DB> {
    db: Arc<RwLock<DB>>,
    payments: Arc<dyn PaymentsClient>,
    clock: Arc<dyn Clock>,
    params: ChallengeParams,
    tombola: TombolaParams,
}

impl<DB: database::DB> VoteCore<DB> {
    pub fn new(
        db: Arc<RwLock<DB>>,
        payments: Arc<dyn PaymentsClient>,
        clock: Arc<dyn Clock>,
        params: ChallengeParams,
        tombola: TombolaParams,
    ) -> Self {
        Self {
            db,
            payments,
            clock,
            params,
            tombola,
        }
    }

    /// Remaining tombola room of a user within the challenge's month.
    pub async fn ticket_allowance(
        &self,
        user: &str,
        challenge_id: Uuid,
    ) -> CoreResult<TicketAllowance> {
        let max = self.tombola.max_tickets_per_user_per_month;
        let used = {
            let user = user.to_owned();
            self.db
                .read()
                .await
                .view(|tx| {
                    let c = tx
                        .challenge(&challenge_id)?
                        .ok_or(CoreError::not_found("challenge"))?;
                    anyhow::Ok(
                        tx.tickets_of_user_in_month(
                            &user,
                            &c.tombola_month_id,
                        )?
                        .len() as u32,
                    )
                })
                .map_err(CoreError::from_db)?
        };
        Ok(TicketAllowance {
            max,
            used,
            available: max.saturating_sub(used),
        })
    }

    /// Member vote: pays, counts and mints tickets. The whole quantity
    /// must fit the user's remaining allowance, otherwise the request is
    /// rejected toward the Support flow.
    pub async fn initiate_vote(
        &self,
        user: &str,
        challenge_id: Uuid,
        entrepreneur_id: Uuid,
        amount: u64,
    ) -> CoreResult<VoteCheckout> {
        let quantity = self.vote_quantity(amount)?;

        let allowance = self.ticket_allowance(user, challenge_id).await?;
        if allowance.available == 0 {
            return Err(CoreError::state(
                "monthly ticket cap reached; use Support to keep funding",
            ));
        }
        if quantity > allowance.available as u64 {
            return Err(CoreError::state(format!(
                "only {} tickets left this month; lower the amount or use \
                 Support",
                allowance.available
            )));
        }

        self.initiate(
            Some(user),
            challenge_id,
            entrepreneur_id,
            amount,
            quantity,
            VoteKind::Vote,
            quantity,
        )
        .await
    }

    /// Support contribution: same payment flow, no allowance check, no
    /// tickets. The payer may be anonymous.
    pub async fn initiate_support(
        &self,
        user: Option<&str>,
        challenge_id: Uuid,
        entrepreneur_id: Uuid,
        amount: u64,
    ) -> CoreResult<VoteCheckout> {
        let quantity = self.vote_quantity(amount)?;
        self.initiate(
            user,
            challenge_id,
            entrepreneur_id,
            amount,
            quantity,
            VoteKind::Support,
            0,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn initiate(
        &self,
        user: Option<&str>,
        challenge_id: Uuid,
        entrepreneur_id: Uuid,
        amount: u64,
        quantity: u64,
        kind: VoteKind,
        tickets_to_generate: u64,
    ) -> CoreResult<VoteCheckout> {
        let now = self.clock.now();

        // Validate the campaign and the candidate before touching money.
        self.db
            .read()
            .await
            .view(|tx| {
                let c = tx
                    .challenge(&challenge_id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if c.status != ChallengeStatus::Active {
                    return Err(CoreError::state(
                        "the challenge is not accepting votes",
                    )
                    .into());
                }
                let e = tx
                    .entrepreneur(&entrepreneur_id)?
                    .filter(|e| e.challenge_id == challenge_id)
                    .ok_or(CoreError::not_found("entrepreneur"))?;
                if !e.approved {
                    return Err(CoreError::state(
                        "this entrepreneur is not approved yet",
                    )
                    .into());
                }
                anyhow::Ok(())
            })
            .map_err(CoreError::from_db)?;

        let vote = ChallengeVote {
            id: Uuid::new_v4(),
            challenge_id,
            entrepreneur_id,
            user_id: user.map(str::to_owned),
            amount_paid: amount,
            vote_quantity: quantity,
            kind,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: None,
            tombola_ticket_ids: Vec::new(),
            tickets_generated: false,
            ticket_generation_error: None,
            created_at: now,
            updated_at: now,
        };
        self.db
            .read()
            .await
            .update(|tx| tx.store_vote(&vote))
            .map_err(CoreError::from_db)?;

        let metadata = VoteIntentMetadata {
            challenge_id,
            entrepreneur_id,
            user_id: vote.user_id.clone(),
            vote_id: vote.id,
            vote_type: kind,
            vote_quantity: quantity,
            tickets_to_generate,
        };
        let intent = match self
            .payments
            .create_intent(&CreateIntent {
                amount,
                currency: CURRENCY,
                user_id: vote.user_id.clone(),
                payment_type: PAYMENT_TYPE_CHALLENGE_VOTE,
                metadata: serde_json::to_value(&metadata)
                    .expect("metadata serializes"),
                originating_service: SERVICE_NAME,
                callback_path: "/challenges/webhooks/payment-confirmation"
                    .to_owned(),
            })
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                // The orphan pending vote is marked failed so it never
                // blocks reconciliation.
                let vote_id = vote.id;
                let _ = self.db.read().await.update(|tx| {
                    if let Some(mut v) = tx.vote(&vote_id)? {
                        v.payment_status = PaymentStatus::Failed;
                        v.updated_at = now;
                        tx.store_vote(&v)?;
                    }
                    Ok(())
                });
                return Err(e.into());
            }
        };

        {
            let session = intent.session_id.clone();
            let vote_id = vote.id;
            self.db
                .read()
                .await
                .update(|tx| {
                    let mut v = tx
                        .vote(&vote_id)?
                        .ok_or(CoreError::not_found("vote"))?;
                    v.payment_intent_id = Some(session.clone());
                    v.updated_at = now;
                    tx.store_vote(&v)?;
                    Ok(())
                })
                .map_err(CoreError::from_db)?;
        }

        Ok(VoteCheckout {
            vote_id: vote.id,
            session_id: intent.session_id,
            checkout_url: intent.checkout_url,
            vote_quantity: quantity,
            ticket_quantity: tickets_to_generate,
        })
    }

    /// The sole write path after payment; safe under webhook retries.
    /// The pending→completed transition inside one transaction is the
    /// idempotency guard: whoever loses the race sees `completed` and
    /// stops.
    pub async fn confirm_payment(
        &self,
        session_id: &str,
        status: &str,
    ) -> CoreResult<ConfirmOutcome> {
        let now = self.clock.now();

        if status == STATUS_FAILED {
            let vote = self
                .db
                .read()
                .await
                .update(|tx| {
                    let id = tx
                        .vote_id_by_intent(session_id)?
                        .ok_or(CoreError::not_found("vote"))?;
                    let mut v =
                        tx.vote(&id)?.ok_or(CoreError::not_found("vote"))?;
                    if v.payment_status == PaymentStatus::Pending {
                        v.payment_status = PaymentStatus::Failed;
                        v.updated_at = now;
                        tx.store_vote(&v)?;
                    }
                    Ok(v)
                })
                .map_err(CoreError::from_db)?;
            return Ok(ConfirmOutcome::Failed(Box::new(vote)));
        }
        if status != STATUS_SUCCEEDED {
            return Err(CoreError::validation(format!(
                "unsupported payment status {status}"
            )));
        }

        // Step 1: conditional completion plus counter bumps, atomically.
        let (vote, already) = self
            .db
            .read()
            .await
            .update(|tx| {
                let id = tx
                    .vote_id_by_intent(session_id)?
                    .ok_or(CoreError::not_found("vote"))?;
                let mut v =
                    tx.vote(&id)?.ok_or(CoreError::not_found("vote"))?;
                if v.payment_status == PaymentStatus::Completed {
                    return Ok((v, true));
                }
                v.payment_status = PaymentStatus::Completed;
                v.updated_at = now;
                tx.store_vote(&v)?;

                let mut e = tx
                    .entrepreneur(&v.entrepreneur_id)?
                    .ok_or(CoreError::not_found("entrepreneur"))?;
                e.vote_count += v.vote_quantity;
                e.total_amount += v.amount_paid;
                e.updated_at = now;
                tx.store_entrepreneur(&e)?;

                let mut c = tx
                    .challenge(&v.challenge_id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                c.total_collected += v.amount_paid;
                c.total_vote_count += v.vote_quantity;
                c.updated_at = now;
                tx.store_challenge(&c)?;

                tx.store_idem_record(&IdemRecord {
                    session_id: session_id.to_owned(),
                    outcome: v.id.to_string(),
                    created_at: now,
                })?;
                Ok((v, false))
            })
            .map_err(CoreError::from_db)?;

        if already {
            return Ok(ConfirmOutcome::AlreadyProcessed(Box::new(vote)));
        }

        counter!("palaver_votes_completed_total").increment(1);
        info!(
            event = "vote_completed",
            session = session_id,
            vote = %vote.id,
            quantity = vote.vote_quantity,
        );

        // Step 2: ticket minting, outside the counter transaction. A
        // failure here is recorded on the vote and reconciled manually,
        // never by reverting the counters.
        let vote = if vote.kind == VoteKind::Vote && vote.user_id.is_some() {
            match self.mint_tickets(&vote, session_id, now).await {
                Ok(minted) => minted,
                Err(e) => {
                    error!(
                        event = "ticket_generation_failed",
                        session = session_id,
                        vote = %vote.id,
                        %e,
                    );
                    self.record_ticket_error(vote.id, &e.to_string(), now)
                        .await?
                }
            }
        } else {
            vote
        };

        Ok(ConfirmOutcome::Completed(Box::new(vote)))
    }

    /// Mints `min(quantity, cap − existing)` tickets with weights from
    /// the user's ticket index, under sequential month numbering.
    async fn mint_tickets(
        &self,
        vote: &ChallengeVote,
        session_id: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<ChallengeVote> {
        let user = vote
            .user_id
            .clone()
            .expect("caller checked the vote has a user");
        let max = self.tombola.max_tickets_per_user_per_month;
        let vote_id = vote.id;
        let challenge_id = vote.challenge_id;
        let quantity = vote.vote_quantity;
        let session = session_id.to_owned();
        let mut rng = StdRng::from_entropy();

        let minted = self
            .db
            .read()
            .await
            .update(move |tx| {
                let c = tx
                    .challenge(&challenge_id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                let mut month = tx
                    .month(&c.tombola_month_id)?
                    .ok_or(CoreError::not_found("tombola month"))?;

                let existing = tx
                    .tickets_of_user_in_month(&user, &month.id)?
                    .len() as u32;
                let to_generate =
                    quantity.min(u64::from(max.saturating_sub(existing)));

                let mut ticket_ids = Vec::with_capacity(to_generate as usize);
                for i in 1..=to_generate {
                    let index = existing + i as u32;
                    let Some(weight) = ticket_weight(index) else {
                        break;
                    };
                    month.last_ticket_number += 1;
                    let ticket = TombolaTicket {
                        ticket_id: opaque_ticket_id(&mut rng),
                        user_id: user.clone(),
                        tombola_month_id: month.id,
                        ticket_number: month.last_ticket_number,
                        weight,
                        user_ticket_index: index,
                        source: TicketSource::ChallengeVote,
                        payment_intent_id: session.clone(),
                        challenge_vote_id: Some(vote_id),
                        created_at: now,
                    };
                    tx.store_ticket(&ticket)?;
                    ticket_ids.push(ticket.ticket_id);
                }
                month.updated_at = now;
                tx.store_month(&month)?;

                let mut v = tx
                    .vote(&vote_id)?
                    .ok_or(CoreError::not_found("vote"))?;
                v.tombola_ticket_ids = ticket_ids;
                v.tickets_generated = true;
                v.updated_at = now;
                tx.store_vote(&v)?;
                Ok(v)
            })
            .map_err(CoreError::from_db)?;

        counter!("palaver_tickets_minted_total")
            .increment(minted.tombola_ticket_ids.len() as u64);
        Ok(minted)
    }

    async fn record_ticket_error(
        &self,
        vote_id: Uuid,
        message: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> CoreResult<ChallengeVote> {
        let message = message.to_owned();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut v = tx
                    .vote(&vote_id)?
                    .ok_or(CoreError::not_found("vote"))?;
                v.ticket_generation_error = Some(message.clone());
                v.updated_at = now;
                tx.store_vote(&v)?;
                Ok(v)
            })
            .map_err(CoreError::from_db)
    }

    fn vote_quantity(&self, amount: u64) -> CoreResult<u64> {
        let price = self.params.vote_price;
        if amount < price {
            return Err(CoreError::validation(format!(
                "amount must be at least {price}"
            )));
        }
        if amount % price != 0 {
            return Err(CoreError::validation(format!(
                "amount must be a multiple of {price}"
            )));
        }
        Ok(amount / price)
    }
}

#[cfg(test)]
mod tests {
    use palaver_data::challenge::ChallengeStatus;

    use super::super::tests::{entrepreneur, fixture, new_challenge, Fixture};
    use super::*;
    use crate::database::rocksdb::Backend;
    use crate::database::DB;

    struct VoteFixture {
        f: Fixture,
        votes: VoteCore<Backend>,
        challenge_id: Uuid,
        entrepreneur_id: Uuid,
    }

    async fn vote_fixture() -> VoteFixture {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("founder")))
            .await
            .unwrap();
        f.core.approve_entrepreneur(e.id).await.unwrap();
        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();

        let votes = VoteCore::new(
            f.db.clone(),
            f.payments.clone(),
            std::sync::Arc::new(f.clock.clone()),
            f.core.params().clone(),
            TombolaParams::default(),
        );
        VoteFixture {
            f,
            votes,
            challenge_id: c.id,
            entrepreneur_id: e.id,
        }
    }

    async fn vote_and_confirm(
        vf: &VoteFixture,
        user: &str,
        amount: u64,
    ) -> ConfirmOutcome {
        let checkout = vf
            .votes
            .initiate_vote(user, vf.challenge_id, vf.entrepreneur_id, amount)
            .await
            .unwrap();
        vf.votes
            .confirm_payment(&checkout.session_id, STATUS_SUCCEEDED)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn amount_must_be_a_positive_multiple_of_the_price() {
        let vf = vote_fixture().await;

        let err = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 100)
            .await;
        assert!(matches!(err, Err(CoreError::Validation(_))));

        let err = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 500)
            .await;
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn weighted_ticket_cap_sequence() {
        let vf = vote_fixture().await;

        // 3 votes: indices 1..=3, all weight 1.0.
        let out = vote_and_confirm(&vf, "u1", 600).await;
        let vote = out.vote();
        assert!(vote.tickets_generated);
        assert_eq!(vote.tombola_ticket_ids.len(), 3);

        // 13 votes: indices 4..=16, twelve at 0.6 and one at 0.3.
        let out = vote_and_confirm(&vf, "u1", 2_600).await;
        assert_eq!(out.vote().tombola_ticket_ids.len(), 13);

        let weights: Vec<f64> = {
            let month_id = {
                vf.f.db
                    .read()
                    .await
                    .view(|tx| {
                        tx.challenge(&vf.challenge_id)
                            .unwrap()
                            .unwrap()
                            .tombola_month_id
                    })
            };
            vf.f.db
                .read()
                .await
                .view(|tx| tx.tickets_of_user_in_month("u1", &month_id))
                .unwrap()
                .iter()
                .map(|t| t.weight)
                .collect()
        };
        assert_eq!(weights.len(), 16);
        assert!(weights[..3].iter().all(|w| *w == 1.0));
        assert!(weights[3..15].iter().all(|w| *w == 0.6));
        assert!(weights[15] == 0.3);

        // 12 more votes exceed the 9 remaining slots: rejected toward
        // Support.
        let err = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 2_400)
            .await;
        match err {
            Err(CoreError::ForbiddenState(msg)) => {
                assert!(msg.contains("Support"))
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // 9 votes exactly fill the cap, all weight 0.3.
        let out = vote_and_confirm(&vf, "u1", 1_800).await;
        assert_eq!(out.vote().tombola_ticket_ids.len(), 9);

        let allowance = vf
            .votes
            .ticket_allowance("u1", vf.challenge_id)
            .await
            .unwrap();
        assert_eq!(allowance.used, 25);
        assert_eq!(allowance.available, 0);

        // At the cap even a single vote is rejected.
        let err = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 200)
            .await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));
    }

    #[tokio::test]
    async fn double_webhook_delivery_is_a_noop() {
        let vf = vote_fixture().await;

        let checkout = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 600)
            .await
            .unwrap();

        let first = vf
            .votes
            .confirm_payment(&checkout.session_id, STATUS_SUCCEEDED)
            .await
            .unwrap();
        assert!(matches!(first, ConfirmOutcome::Completed(_)));

        let second = vf
            .votes
            .confirm_payment(&checkout.session_id, STATUS_SUCCEEDED)
            .await
            .unwrap();
        assert!(matches!(second, ConfirmOutcome::AlreadyProcessed(_)));

        let challenge = vf.f.core.get(vf.challenge_id).await.unwrap();
        assert_eq!(challenge.total_vote_count, 3);
        assert_eq!(challenge.total_collected, 600);

        let roster = vf.f.core.entrepreneurs(vf.challenge_id, true).await.unwrap();
        assert_eq!(roster[0].vote_count, 3);
        assert_eq!(roster[0].total_amount, 600);

        // Tickets were minted exactly once.
        let month_id = challenge.tombola_month_id;
        let numbers =
            vf.f.db
                .read()
                .await
                .view(|tx| tx.ticket_numbers(&month_id))
                .unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);

        // The idempotency record maps the session to its outcome.
        let record =
            vf.f.db
                .read()
                .await
                .view(|tx| tx.idem_record(&checkout.session_id))
                .unwrap()
                .expect("idem record written with the confirmation");
        assert_eq!(record.outcome, checkout.vote_id.to_string());
    }

    #[tokio::test]
    async fn support_never_mints_tickets_and_may_be_anonymous() {
        let vf = vote_fixture().await;

        let checkout = vf
            .votes
            .initiate_support(None, vf.challenge_id, vf.entrepreneur_id, 1_000)
            .await
            .unwrap();
        assert_eq!(checkout.ticket_quantity, 0);
        assert_eq!(checkout.vote_quantity, 5);

        let out = vf
            .votes
            .confirm_payment(&checkout.session_id, STATUS_SUCCEEDED)
            .await
            .unwrap();
        let vote = out.vote();
        assert!(!vote.tickets_generated);
        assert!(vote.tombola_ticket_ids.is_empty());

        let challenge = vf.f.core.get(vf.challenge_id).await.unwrap();
        assert_eq!(challenge.total_vote_count, 5);
        assert_eq!(challenge.total_collected, 1_000);

        // Supporters with an account still mint nothing.
        let checkout = vf
            .votes
            .initiate_support(
                Some("u9"),
                vf.challenge_id,
                vf.entrepreneur_id,
                200,
            )
            .await
            .unwrap();
        let out = vf
            .votes
            .confirm_payment(&checkout.session_id, STATUS_SUCCEEDED)
            .await
            .unwrap();
        assert!(out.vote().tombola_ticket_ids.is_empty());
    }

    #[tokio::test]
    async fn failed_payment_marks_the_vote() {
        let vf = vote_fixture().await;
        let checkout = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 400)
            .await
            .unwrap();

        let out = vf
            .votes
            .confirm_payment(&checkout.session_id, STATUS_FAILED)
            .await
            .unwrap();
        assert!(matches!(out, ConfirmOutcome::Failed(_)));
        assert_eq!(out.vote().payment_status, PaymentStatus::Failed);

        let challenge = vf.f.core.get(vf.challenge_id).await.unwrap();
        assert_eq!(challenge.total_collected, 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let vf = vote_fixture().await;
        let err = vf
            .votes
            .confirm_payment("sess-unknown", STATUS_SUCCEEDED)
            .await;
        assert!(matches!(err, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn votes_on_inactive_challenges_are_rejected() {
        let vf = vote_fixture().await;
        vf.f.core.close_voting(vf.challenge_id).await.unwrap();

        let err = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 200)
            .await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));
    }

    #[tokio::test]
    async fn intent_metadata_carries_the_vote_linkage() {
        let vf = vote_fixture().await;
        let checkout = vf
            .votes
            .initiate_vote("u1", vf.challenge_id, vf.entrepreneur_id, 600)
            .await
            .unwrap();

        let intents = vf.f.payments.intents.lock();
        let intent = intents.last().unwrap();
        assert_eq!(intent.payment_type, PAYMENT_TYPE_CHALLENGE_VOTE);
        let meta: VoteIntentMetadata =
            serde_json::from_value(intent.metadata.clone()).unwrap();
        assert_eq!(meta.vote_id, checkout.vote_id);
        assert_eq!(meta.vote_quantity, 3);
        assert_eq!(meta.tickets_to_generate, 3);
        assert_eq!(meta.vote_type, VoteKind::Vote);
    }
}
