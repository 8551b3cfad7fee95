// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use metrics::counter;
use palaver_data::events::Notification;
use palaver_data::idem::IdemRecord;
use palaver_data::tombola::{
    opaque_ticket_id, previous_month, ticket_weight, TicketSource,
    TombolaMonth, TombolaStatus, TombolaTicket, Winner, PRIZES,
};
use palaver_data::UserId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clients::notifier::notify_detached;
use crate::clients::payments::{
    CreateIntent, PaymentsClient, CURRENCY, PAYMENT_TYPE_TOMBOLA_TICKET,
};
use crate::clients::{NotifierClient, SERVICE_NAME};
use crate::clock::Clock;
use crate::database::{self, Idem, Tombolas};
use crate::error::{CoreError, CoreResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TombolaParams {
    pub ticket_price: u64,
    pub max_tickets_per_user_per_month: u32,
}

impl Default for TombolaParams {
    fn default() -> Self {
        Self {
            ticket_price: 200,
            max_tickets_per_user_per_month: 25,
        }
    }
}

/// Metadata carried on a direct ticket-purchase intent and returned by
/// the confirmation webhook. The provisional `ticket_id` is the
/// idempotency key of the whole purchase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketIntentMetadata {
    pub ticket_id: String,
    pub tombola_month_id: Uuid,
    pub user_id: UserId,
}

/// What the client needs to complete a checkout.
#[derive(Clone, Debug, Serialize)]
pub struct TicketCheckout {
    pub ticket_id: String,
    pub session_id: String,
    pub checkout_url: String,
    pub amount: u64,
}

/// Monthly tombola lifecycle, sequential ticket numbering and the
/// weighted draw.
pub struct TombolaCore<DB> {
    db: Arc<RwLock<DB>>,
    payments: Arc<dyn PaymentsClient>,
    notifier: Arc<dyn NotifierClient>,
    clock: Arc<dyn Clock>,
    params: TombolaParams,
}

impl<DB: database::DB> TombolaCore<DB> {
    pub fn new(
        db: Arc<RwLock<DB>>,
        payments: Arc<dyn PaymentsClient>,
        notifier: Arc<dyn NotifierClient>,
        clock: Arc<dyn Clock>,
        params: TombolaParams,
    ) -> Self {
        Self {
            db,
            payments,
            notifier,
            clock,
            params,
        }
    }

    pub fn params(&self) -> &TombolaParams {
        &self.params
    }

    /// Opens the month, closing every previously open one. Future months
    /// and duplicates are rejected.
    pub async fn create_month(
        &self,
        month: u32,
        year: i32,
    ) -> CoreResult<TombolaMonth> {
        let now = self.clock.now();
        validate_month_date(month, year, now)?;

        self.db
            .read()
            .await
            .update(|tx| {
                if tx.month_id_by_date(month, year)?.is_some() {
                    return Err(CoreError::conflict(format!(
                        "tombola {month}/{year} already exists"
                    ))
                    .into());
                }
                find_or_create_month_tx(tx, month, year, now)
            })
            .map_err(CoreError::from_db)
    }

    /// Admin status override. Opening a month closes every other one.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TombolaStatus,
    ) -> CoreResult<TombolaMonth> {
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut month = tx
                    .month(&id)?
                    .ok_or(CoreError::not_found("tombola month"))?;
                if status == TombolaStatus::Open {
                    close_open_months(tx, now)?;
                }
                month.status = status;
                month.updated_at = now;
                tx.store_month(&month)?;
                Ok(month)
            })
            .map_err(CoreError::from_db)
    }

    pub async fn months(&self) -> CoreResult<Vec<TombolaMonth>> {
        Ok(self.db.read().await.view(|tx| tx.months_desc())?)
    }

    pub async fn month(&self, id: Uuid) -> CoreResult<TombolaMonth> {
        self.db
            .read()
            .await
            .view(|tx| tx.month(&id))?
            .ok_or_else(|| CoreError::not_found("tombola month"))
    }

    /// The currently open month, if any.
    pub async fn current(&self) -> CoreResult<Option<TombolaMonth>> {
        let mut open = self.db.read().await.view(|tx| tx.open_months())?;
        open.sort_by_key(|m| (m.year, m.month));
        Ok(open.pop())
    }

    pub async fn winners(&self, id: Uuid) -> CoreResult<Vec<Winner>> {
        Ok(self.month(id).await?.winners)
    }

    pub async fn tickets_of_month(
        &self,
        id: Uuid,
    ) -> CoreResult<Vec<TombolaTicket>> {
        Ok(self
            .db
            .read()
            .await
            .view(|tx| tx.tickets_of_month(&id))?)
    }

    pub async fn ticket_numbers(&self, id: Uuid) -> CoreResult<Vec<u64>> {
        Ok(self.db.read().await.view(|tx| tx.ticket_numbers(&id))?)
    }

    pub async fn tickets_of_user(
        &self,
        user: &str,
    ) -> CoreResult<Vec<TombolaTicket>> {
        Ok(self
            .db
            .read()
            .await
            .view(|tx| tx.tickets_of_user(user))?)
    }

    /// Starts a single-ticket checkout against the open month. The
    /// ticket itself is only minted on confirmed payment.
    pub async fn buy_ticket(&self, user: &str) -> CoreResult<TicketCheckout> {
        let month = self
            .current()
            .await?
            .ok_or_else(|| CoreError::state("no tombola month is open"))?;

        let existing = {
            let user = user.to_owned();
            self.db
                .read()
                .await
                .view(|tx| tx.tickets_of_user_in_month(&user, &month.id))?
                .len() as u32
        };
        if existing >= self.params.max_tickets_per_user_per_month {
            return Err(CoreError::state(format!(
                "monthly cap of {} tickets reached",
                self.params.max_tickets_per_user_per_month
            )));
        }

        let ticket_id = opaque_ticket_id(&mut StdRng::from_entropy());
        let metadata = TicketIntentMetadata {
            ticket_id: ticket_id.clone(),
            tombola_month_id: month.id,
            user_id: user.to_owned(),
        };
        let intent = self
            .payments
            .create_intent(&CreateIntent {
                amount: self.params.ticket_price,
                currency: CURRENCY,
                user_id: Some(user.to_owned()),
                payment_type: PAYMENT_TYPE_TOMBOLA_TICKET,
                metadata: serde_json::to_value(&metadata)
                    .expect("metadata serializes"),
                originating_service: SERVICE_NAME,
                callback_path: "/tombolas/webhooks/payment-confirmation"
                    .to_owned(),
            })
            .await?;

        Ok(TicketCheckout {
            ticket_id,
            session_id: intent.session_id,
            checkout_url: intent.checkout_url,
            amount: self.params.ticket_price,
        })
    }

    /// Webhook entry point. Idempotent on the provisional ticket id: a
    /// retried delivery returns the already-minted ticket.
    pub async fn confirm_ticket_purchase(
        &self,
        session_id: &str,
        metadata: &TicketIntentMetadata,
    ) -> CoreResult<TombolaTicket> {
        let now = self.clock.now();
        let max = self.params.max_tickets_per_user_per_month;
        let ticket = self
            .db
            .read()
            .await
            .update(|tx| {
                if let Some(existing) = tx.ticket(&metadata.ticket_id)? {
                    return Ok(existing);
                }
                let mut month = tx
                    .month(&metadata.tombola_month_id)?
                    .ok_or(CoreError::not_found("tombola month"))?;

                let index = tx
                    .tickets_of_user_in_month(
                        &metadata.user_id,
                        &month.id,
                    )?
                    .len() as u32
                    + 1;
                let weight = ticket_weight(index).ok_or_else(|| {
                    CoreError::Integrity(format!(
                        "session {session_id}: user {} is over the {max}-ticket \
                         cap at confirmation",
                        metadata.user_id
                    ))
                })?;

                month.last_ticket_number += 1;
                month.updated_at = now;
                tx.store_month(&month)?;

                let ticket = TombolaTicket {
                    ticket_id: metadata.ticket_id.clone(),
                    user_id: metadata.user_id.clone(),
                    tombola_month_id: month.id,
                    ticket_number: month.last_ticket_number,
                    weight,
                    user_ticket_index: index,
                    source: TicketSource::DirectPurchase,
                    payment_intent_id: session_id.to_owned(),
                    challenge_vote_id: None,
                    created_at: now,
                };
                tx.store_ticket(&ticket)?;
                tx.store_idem_record(&IdemRecord {
                    session_id: session_id.to_owned(),
                    outcome: ticket.ticket_id.clone(),
                    created_at: now,
                })?;
                Ok(ticket)
            })
            .map_err(CoreError::from_db)?;

        counter!("palaver_tickets_minted_total").increment(1);
        Ok(ticket)
    }

    /// Runs the weighted draw and closes the month. Winner notifications
    /// go out best-effort after the commit.
    pub async fn draw_winners(&self, id: Uuid) -> CoreResult<TombolaMonth> {
        self.draw_with_rng(id, &mut StdRng::from_entropy()).await
    }

    /// Deterministic variant driving the tests.
    pub async fn draw_with_rng<R: Rng + Send>(
        &self,
        id: Uuid,
        rng: &mut R,
    ) -> CoreResult<TombolaMonth> {
        let now = self.clock.now();
        let month = self
            .db
            .read()
            .await
            .update(|tx| {
                let mut month = tx
                    .month(&id)?
                    .ok_or(CoreError::not_found("tombola month"))?;
                if !matches!(
                    month.status,
                    TombolaStatus::Open | TombolaStatus::Drawing
                ) {
                    return Err(CoreError::state(
                        "tombola month is already closed",
                    )
                    .into());
                }
                if !month.winners.is_empty() {
                    return Err(CoreError::state(
                        "winners were already drawn",
                    )
                    .into());
                }

                let tickets = tx.tickets_of_month(&id)?;
                month.winners =
                    draw(&tickets, &month.previous_month_winners, rng);
                month.status = TombolaStatus::Closed;
                month.draw_date = Some(now);
                month.updated_at = now;
                tx.store_month(&month)?;
                Ok(month)
            })
            .map_err(CoreError::from_db)?;

        counter!("palaver_draws_total").increment(1);

        for winner in &month.winners {
            notify_detached(
                self.notifier.clone(),
                Notification {
                    user_id: winner.user_id.clone(),
                    kind: "tombola_win".into(),
                    title: "Tombola".into(),
                    body: format!(
                        "You won the {} (rank {})!",
                        winner.prize, winner.rank
                    ),
                    from_user_id: None,
                },
            );
        }
        Ok(month)
    }
}

/// Up to three ranks over the eligible tickets, each pick proportional to
/// ticket weight, one prize per user, previous-month winners excluded.
fn draw<R: Rng>(
    tickets: &[TombolaTicket],
    excluded: &HashSet<UserId>,
    rng: &mut R,
) -> Vec<Winner> {
    let eligible: Vec<&TombolaTicket> = tickets
        .iter()
        .filter(|t| !excluded.contains(&t.user_id))
        .collect();
    if eligible.is_empty() {
        return Vec::new();
    }

    let distinct_users: HashSet<&str> =
        eligible.iter().map(|t| t.user_id.as_str()).collect();
    let prize_count = distinct_users.len().min(PRIZES.len());

    let mut winners = Vec::with_capacity(prize_count);
    let mut selected: HashSet<&str> = HashSet::new();
    for rank in 1..=prize_count {
        let pool: Vec<&TombolaTicket> = eligible
            .iter()
            .copied()
            .filter(|t| !selected.contains(t.user_id.as_str()))
            .collect();
        let total: f64 = pool.iter().map(|t| effective_weight(t)).sum();
        let roll = rng.gen_range(0.0..total);
        let pick = pick_weighted(&pool, roll);

        selected.insert(pick.user_id.as_str());
        winners.push(Winner {
            user_id: pick.user_id.clone(),
            prize: PRIZES[rank - 1].to_owned(),
            rank: rank as u8,
            winning_ticket_number: pick.ticket_number,
        });
    }
    winners
}

fn effective_weight(ticket: &TombolaTicket) -> f64 {
    if ticket.weight > 0.0 {
        ticket.weight
    } else {
        1.0
    }
}

/// Linear walk over cumulative weights; rounding fallthrough lands on the
/// last ticket.
fn pick_weighted<'t>(
    pool: &[&'t TombolaTicket],
    roll: f64,
) -> &'t TombolaTicket {
    let mut acc = 0.0;
    for ticket in pool {
        acc += effective_weight(ticket);
        if roll < acc {
            return ticket;
        }
    }
    pool.last().expect("pool is never empty")
}

fn validate_month_date(
    month: u32,
    year: i32,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !(1..=12).contains(&month) {
        return Err(CoreError::validation("month must be within 1..=12"));
    }
    if (year, month) > (now.year(), now.month()) {
        return Err(CoreError::validation(
            "cannot create a future tombola month",
        ));
    }
    Ok(())
}

/// Looks up the month, creating and opening it when missing: other open
/// months get closed and `previous_month_winners` is seeded from the
/// preceding month's winner list.
pub(crate) fn find_or_create_month_tx<P: database::Persist>(
    tx: &mut P,
    month: u32,
    year: i32,
    now: DateTime<Utc>,
) -> anyhow::Result<TombolaMonth> {
    if let Some(id) = tx.month_id_by_date(month, year)? {
        return tx
            .month(&id)?
            .ok_or_else(|| anyhow::anyhow!("dangling month index for {id}"));
    }

    close_open_months(tx, now)?;

    let mut created = TombolaMonth::new(month, year, now);
    let (prev_month, prev_year) = previous_month(month, year);
    if let Some(prev_id) = tx.month_id_by_date(prev_month, prev_year)? {
        if let Some(prev) = tx.month(&prev_id)? {
            created.previous_month_winners =
                prev.winners.iter().map(|w| w.user_id.clone()).collect();
        }
    }
    tx.store_month(&created)?;
    Ok(created)
}

fn close_open_months<P: database::Persist>(
    tx: &mut P,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    for mut open in tx.open_months()? {
        open.status = TombolaStatus::Closed;
        open.updated_at = now;
        tx.store_month(&open)?;
    }
    Ok(())
}
