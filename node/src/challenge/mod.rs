// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod vote;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use palaver_data::challenge::{
    split_funds, ChallengeStatus, ChallengeVote, Distribution, Entrepreneur,
    FundSplit, ImpactChallenge, LocalizedText,
};
use palaver_data::page::Paged;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::clients::payments::{DepositTarget, PaymentsClient};
use crate::clock::Clock;
use crate::database::{self, Challenges, Tombolas};
use crate::error::{CoreError, CoreResult};
use crate::tombola::find_or_create_month_tx;

pub use vote::{ConfirmOutcome, TicketAllowance, VoteCheckout, VoteCore};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeParams {
    pub vote_price: u64,
    pub max_entrepreneurs: usize,
    pub video_max_secs: u32,
    /// Internal accounts the 30% and 20% legs are deposited to. Fund
    /// distribution refuses to run while unset.
    pub lottery_pool_account_id: Option<String>,
    pub commission_account_id: Option<String>,
}

impl Default for ChallengeParams {
    fn default() -> Self {
        Self {
            vote_price: 200,
            max_entrepreneurs: 3,
            video_max_secs: 90,
            lottery_pool_account_id: None,
            commission_account_id: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewChallenge {
    pub month: u32,
    pub year: i32,
    pub campaign_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub description: LocalizedText,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChallengePatch {
    pub campaign_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub description: Option<LocalizedText>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewEntrepreneur {
    pub user_id: Option<UserId>,
    pub project_name: String,
    pub business_sector: Option<String>,
    pub pitch: String,
    pub video_url: Option<String>,
    pub video_duration_secs: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EntrepreneurPatch {
    pub user_id: Option<UserId>,
    pub project_name: Option<String>,
    pub business_sector: Option<String>,
    pub pitch: Option<String>,
    pub video_url: Option<String>,
    pub video_duration_secs: Option<u32>,
}

/// Money view of a campaign: live 50/30/20 split plus the recorded legs
/// once distribution ran.
#[derive(Clone, Debug, Serialize)]
pub struct FundSummary {
    pub total_collected: u64,
    pub total_vote_count: u64,
    pub winner_share: u64,
    pub lottery_share: u64,
    pub commission_share: u64,
    pub funds_distributed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EntrepreneurStanding {
    pub entrepreneur_id: Uuid,
    pub project_name: String,
    pub vote_count: u64,
    pub total_amount: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChallengeAnalytics {
    pub total_collected: u64,
    pub total_vote_count: u64,
    pub completed_votes: u64,
    pub unique_voters: u64,
    pub standings: Vec<EntrepreneurStanding>,
}

/// Campaign lifecycle, the entrepreneur roster, leaderboard
/// denormalization and the fund-distribution protocol.
pub struct ChallengeCore<DB> {
    db: Arc<RwLock<DB>>,
    payments: Arc<dyn PaymentsClient>,
    clock: Arc<dyn Clock>,
    params: ChallengeParams,
}

impl<DB: database::DB> ChallengeCore<DB> {
    pub fn new(
        db: Arc<RwLock<DB>>,
        payments: Arc<dyn PaymentsClient>,
        clock: Arc<dyn Clock>,
        params: ChallengeParams,
    ) -> Self {
        Self {
            db,
            payments,
            clock,
            params,
        }
    }

    pub fn params(&self) -> &ChallengeParams {
        &self.params
    }

    /// Creates a draft campaign, finding or creating its tombola month.
    /// The month's `previous_month_winners` is seeded from the preceding
    /// month (December of the previous year for January).
    pub async fn create(
        &self,
        new: NewChallenge,
    ) -> CoreResult<ImpactChallenge> {
        if !(1..=12).contains(&new.month) {
            return Err(CoreError::validation("month must be within 1..=12"));
        }
        if new.end_date <= new.start_date {
            return Err(CoreError::validation(
                "end date must come after start date",
            ));
        }
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                if tx.challenge_id_by_date(new.month, new.year)?.is_some() {
                    return Err(CoreError::conflict(format!(
                        "challenge {}/{} already exists",
                        new.month, new.year
                    ))
                    .into());
                }
                let mut month =
                    find_or_create_month_tx(tx, new.month, new.year, now)?;

                let challenge = ImpactChallenge {
                    id: Uuid::new_v4(),
                    month: new.month,
                    year: new.year,
                    campaign_name: new.campaign_name.clone(),
                    status: ChallengeStatus::Draft,
                    start_date: new.start_date,
                    end_date: new.end_date,
                    description: new.description.clone(),
                    tombola_month_id: month.id,
                    total_collected: 0,
                    total_vote_count: 0,
                    funds_distributed: false,
                    distribution: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.store_challenge(&challenge)?;

                month.linked_challenge_id = Some(challenge.id);
                month.updated_at = now;
                tx.store_month(&month)?;
                Ok(challenge)
            })
            .map_err(CoreError::from_db)
    }

    pub async fn get(&self, id: Uuid) -> CoreResult<ImpactChallenge> {
        self.db
            .read()
            .await
            .view(|tx| tx.challenge(&id))?
            .ok_or_else(|| CoreError::not_found("challenge"))
    }

    pub async fn list(&self) -> CoreResult<Vec<ImpactChallenge>> {
        Ok(self.db.read().await.view(|tx| tx.challenges_desc())?)
    }

    /// The campaign to surface publicly: the active one, else the most
    /// recently closed one.
    pub async fn current(&self) -> CoreResult<Option<ImpactChallenge>> {
        let all = self.list().await?;
        Ok(all
            .iter()
            .find(|c| c.status == ChallengeStatus::Active)
            .or_else(|| {
                all.iter().find(|c| {
                    matches!(
                        c.status,
                        ChallengeStatus::VotingClosed
                            | ChallengeStatus::FundsDistributed
                    )
                })
            })
            .cloned())
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: ChallengePatch,
    ) -> CoreResult<ImpactChallenge> {
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut c = tx
                    .challenge(&id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if !matches!(
                    c.status,
                    ChallengeStatus::Draft | ChallengeStatus::Active
                ) {
                    return Err(CoreError::state(
                        "challenge can no longer be edited",
                    )
                    .into());
                }
                if let Some(name) = patch.campaign_name {
                    c.campaign_name = name;
                }
                if let Some(start) = patch.start_date {
                    c.start_date = start;
                }
                if let Some(end) = patch.end_date {
                    c.end_date = end;
                }
                if let Some(description) = patch.description {
                    c.description = description;
                }
                if c.end_date <= c.start_date {
                    return Err(CoreError::validation(
                        "end date must come after start date",
                    )
                    .into());
                }
                c.updated_at = now;
                tx.store_challenge(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)
    }

    /// Deletes a campaign that never ran (draft or cancelled), along with
    /// its roster.
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        self.db
            .read()
            .await
            .update(|tx| {
                let c = tx
                    .challenge(&id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if !matches!(
                    c.status,
                    ChallengeStatus::Draft | ChallengeStatus::Cancelled
                ) {
                    return Err(CoreError::state(
                        "only draft or cancelled challenges can be deleted",
                    )
                    .into());
                }
                for e in tx.entrepreneurs_of(&id)? {
                    if e.vote_count > 0 {
                        return Err(CoreError::state(
                            "challenge has recorded votes",
                        )
                        .into());
                    }
                    tx.delete_entrepreneur(&e)?;
                }
                tx.delete_challenge(&c)?;
                Ok(())
            })
            .map_err(CoreError::from_db)
    }

    /// Plain lifecycle moves. Closing the vote and distributing funds
    /// have dedicated operations and are refused here.
    pub async fn set_status(
        &self,
        id: Uuid,
        next: ChallengeStatus,
    ) -> CoreResult<ImpactChallenge> {
        if matches!(
            next,
            ChallengeStatus::VotingClosed | ChallengeStatus::FundsDistributed
        ) {
            return Err(CoreError::validation(
                "use the close-voting and distribute-funds operations",
            ));
        }
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut c = tx
                    .challenge(&id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if !c.status.can_transition_to(next) {
                    return Err(CoreError::state(format!(
                        "cannot move challenge from {:?} to {next:?}",
                        c.status
                    ))
                    .into());
                }
                c.status = next;
                c.updated_at = now;
                tx.store_challenge(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)
    }

    pub async fn add_entrepreneur(
        &self,
        challenge_id: Uuid,
        new: NewEntrepreneur,
    ) -> CoreResult<Entrepreneur> {
        if new
            .video_duration_secs
            .is_some_and(|d| d > self.params.video_max_secs)
        {
            return Err(CoreError::validation(format!(
                "pitch video exceeds {} seconds",
                self.params.video_max_secs
            )));
        }
        let now = self.clock.now();
        let max = self.params.max_entrepreneurs;
        self.db
            .read()
            .await
            .update(|tx| {
                let c = tx
                    .challenge(&challenge_id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if !matches!(
                    c.status,
                    ChallengeStatus::Draft | ChallengeStatus::Active
                ) {
                    return Err(CoreError::state(
                        "the roster is frozen once voting closes",
                    )
                    .into());
                }
                if tx.entrepreneurs_of(&challenge_id)?.len() >= max {
                    return Err(CoreError::conflict(format!(
                        "challenge roster is limited to {max} entrepreneurs"
                    ))
                    .into());
                }
                let e = Entrepreneur {
                    id: Uuid::new_v4(),
                    challenge_id,
                    user_id: new.user_id.clone(),
                    project_name: new.project_name.clone(),
                    business_sector: new.business_sector.clone(),
                    pitch: new.pitch.clone(),
                    video_url: new.video_url.clone(),
                    video_duration_secs: new.video_duration_secs,
                    vote_count: 0,
                    total_amount: 0,
                    rank: None,
                    is_winner: false,
                    approved: false,
                    created_at: now,
                    updated_at: now,
                };
                tx.store_entrepreneur(&e)?;
                Ok(e)
            })
            .map_err(CoreError::from_db)
    }

    pub async fn update_entrepreneur(
        &self,
        id: Uuid,
        patch: EntrepreneurPatch,
    ) -> CoreResult<Entrepreneur> {
        if patch
            .video_duration_secs
            .is_some_and(|d| d > self.params.video_max_secs)
        {
            return Err(CoreError::validation(format!(
                "pitch video exceeds {} seconds",
                self.params.video_max_secs
            )));
        }
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut e = tx
                    .entrepreneur(&id)?
                    .ok_or(CoreError::not_found("entrepreneur"))?;
                if let Some(user_id) = patch.user_id {
                    e.user_id = Some(user_id);
                }
                if let Some(name) = patch.project_name {
                    e.project_name = name;
                }
                if let Some(sector) = patch.business_sector {
                    e.business_sector = Some(sector);
                }
                if let Some(pitch) = patch.pitch {
                    e.pitch = pitch;
                }
                if let Some(url) = patch.video_url {
                    e.video_url = Some(url);
                }
                if let Some(duration) = patch.video_duration_secs {
                    e.video_duration_secs = Some(duration);
                }
                e.updated_at = now;
                tx.store_entrepreneur(&e)?;
                Ok(e)
            })
            .map_err(CoreError::from_db)
    }

    /// Approval flips exactly once.
    pub async fn approve_entrepreneur(
        &self,
        id: Uuid,
    ) -> CoreResult<Entrepreneur> {
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut e = tx
                    .entrepreneur(&id)?
                    .ok_or(CoreError::not_found("entrepreneur"))?;
                if e.approved {
                    return Err(CoreError::conflict(
                        "entrepreneur is already approved",
                    )
                    .into());
                }
                e.approved = true;
                e.updated_at = now;
                tx.store_entrepreneur(&e)?;
                Ok(e)
            })
            .map_err(CoreError::from_db)
    }

    pub async fn delete_entrepreneur(&self, id: Uuid) -> CoreResult<()> {
        self.db
            .read()
            .await
            .update(|tx| {
                let e = tx
                    .entrepreneur(&id)?
                    .ok_or(CoreError::not_found("entrepreneur"))?;
                if e.vote_count > 0 {
                    return Err(CoreError::state(
                        "entrepreneurs with votes cannot be removed",
                    )
                    .into());
                }
                tx.delete_entrepreneur(&e)?;
                Ok(())
            })
            .map_err(CoreError::from_db)
    }

    /// Public roster (approved only) or the full admin roster.
    pub async fn entrepreneurs(
        &self,
        challenge_id: Uuid,
        include_unapproved: bool,
    ) -> CoreResult<Vec<Entrepreneur>> {
        let mut roster = self
            .db
            .read()
            .await
            .view(|tx| tx.entrepreneurs_of(&challenge_id))?;
        if !include_unapproved {
            roster.retain(|e| e.approved);
        }
        roster.sort_by_key(|e| e.created_at);
        Ok(roster)
    }

    /// Approved entrepreneurs by descending tally.
    pub async fn leaderboard(
        &self,
        challenge_id: Uuid,
    ) -> CoreResult<Vec<Entrepreneur>> {
        let mut roster = self.entrepreneurs(challenge_id, false).await?;
        sort_standings(&mut roster);
        Ok(roster)
    }

    /// Freezes the tally: ranks are written onto the roster and the
    /// campaign moves to `voting_closed`. Rank 1 is flagged winner.
    pub async fn close_voting(
        &self,
        id: Uuid,
    ) -> CoreResult<ImpactChallenge> {
        let now = self.clock.now();
        let challenge = self
            .db
            .read()
            .await
            .update(|tx| {
                let mut c = tx
                    .challenge(&id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                if c.status != ChallengeStatus::Active {
                    return Err(CoreError::state(
                        "voting can only be closed on an active challenge",
                    )
                    .into());
                }

                let mut roster = tx.entrepreneurs_of(&id)?;
                sort_standings(&mut roster);
                for (position, e) in roster.iter_mut().enumerate() {
                    e.rank = Some(position as u32 + 1);
                    e.is_winner = position == 0;
                    e.updated_at = now;
                    tx.store_entrepreneur(e)?;
                }

                c.status = ChallengeStatus::VotingClosed;
                c.updated_at = now;
                tx.store_challenge(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)?;

        info!(event = "voting_closed", challenge = %challenge.id);
        Ok(challenge)
    }

    /// The 50/30/20 distribution. Each deposit leg records its ledger
    /// transaction id as soon as it succeeds, so a retried run never
    /// re-issues a completed leg.
    pub async fn distribute_funds(
        &self,
        id: Uuid,
    ) -> CoreResult<ImpactChallenge> {
        let challenge = self.get(id).await?;
        if challenge.status != ChallengeStatus::VotingClosed {
            return Err(CoreError::state(
                "funds can only be distributed after voting closes",
            ));
        }
        if challenge.funds_distributed {
            return Err(CoreError::state("funds were already distributed"));
        }
        let lottery_account = self
            .params
            .lottery_pool_account_id
            .clone()
            .ok_or_else(|| {
                CoreError::state("lottery pool account is not configured")
            })?;
        let commission_account = self
            .params
            .commission_account_id
            .clone()
            .ok_or_else(|| {
                CoreError::state("commission account is not configured")
            })?;

        let winner_user = self
            .entrepreneurs(id, true)
            .await?
            .into_iter()
            .find(|e| e.is_winner)
            .and_then(|e| e.user_id)
            .ok_or_else(|| {
                CoreError::state(
                    "winner entrepreneur has no linked user account",
                )
            })?;

        let split = split_funds(challenge.total_collected);
        let mut dist = challenge.distribution.unwrap_or_default();
        dist.winner_amount = split.winner;
        dist.lottery_amount = split.lottery;
        dist.commission_amount = split.commission;

        if dist.winner_txn_id.is_none() {
            let txn = self
                .payments
                .internal_deposit(
                    &DepositTarget::User {
                        user_id: winner_user.clone(),
                    },
                    split.winner,
                    &format!("challenge {} winner payout", challenge.id),
                )
                .await
                .map_err(|e| self.log_leg_failure(id, "winner", e))?;
            dist.winner_txn_id = Some(txn);
            self.persist_distribution(id, &dist, false).await?;
        }

        if dist.lottery_txn_id.is_none() {
            let txn = self
                .payments
                .internal_deposit(
                    &DepositTarget::Account {
                        account_id: lottery_account,
                    },
                    split.lottery,
                    &format!("challenge {} lottery pool", challenge.id),
                )
                .await
                .map_err(|e| self.log_leg_failure(id, "lottery", e))?;
            dist.lottery_txn_id = Some(txn);
            self.persist_distribution(id, &dist, false).await?;
        }

        if dist.commission_txn_id.is_none() {
            let txn = self
                .payments
                .internal_deposit(
                    &DepositTarget::Account {
                        account_id: commission_account,
                    },
                    split.commission,
                    &format!("challenge {} commission", challenge.id),
                )
                .await
                .map_err(|e| self.log_leg_failure(id, "commission", e))?;
            dist.commission_txn_id = Some(txn);
        }

        dist.distributed_at = Some(self.clock.now());
        let challenge = self.persist_distribution(id, &dist, true).await?;
        info!(
            event = "funds_distributed",
            challenge = %id,
            winner = split.winner,
            lottery = split.lottery,
            commission = split.commission,
        );
        Ok(challenge)
    }

    pub async fn fund_summary(&self, id: Uuid) -> CoreResult<FundSummary> {
        let challenge = self.get(id).await?;
        let FundSplit {
            winner,
            lottery,
            commission,
        } = split_funds(challenge.total_collected);
        Ok(FundSummary {
            total_collected: challenge.total_collected,
            total_vote_count: challenge.total_vote_count,
            winner_share: winner,
            lottery_share: lottery,
            commission_share: commission,
            funds_distributed: challenge.funds_distributed,
            distribution: challenge.distribution,
        })
    }

    pub async fn analytics(
        &self,
        id: Uuid,
    ) -> CoreResult<ChallengeAnalytics> {
        let challenge = self.get(id).await?;
        let votes = self
            .db
            .read()
            .await
            .view(|tx| tx.votes_of_challenge(&id))?;
        let completed: Vec<&ChallengeVote> = votes
            .iter()
            .filter(|v| {
                v.payment_status
                    == palaver_data::challenge::PaymentStatus::Completed
            })
            .collect();
        let unique_voters = completed
            .iter()
            .filter_map(|v| v.user_id.as_deref())
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;

        let mut roster = self.entrepreneurs(id, true).await?;
        sort_standings(&mut roster);
        Ok(ChallengeAnalytics {
            total_collected: challenge.total_collected,
            total_vote_count: challenge.total_vote_count,
            completed_votes: completed.len() as u64,
            unique_voters,
            standings: roster
                .into_iter()
                .map(|e| EntrepreneurStanding {
                    entrepreneur_id: e.id,
                    project_name: e.project_name,
                    vote_count: e.vote_count,
                    total_amount: e.total_amount,
                })
                .collect(),
        })
    }

    pub async fn votes(
        &self,
        id: Uuid,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<ChallengeVote>> {
        let mut votes = self
            .db
            .read()
            .await
            .view(|tx| tx.votes_of_challenge(&id))?;
        votes.sort_by_key(|v| std::cmp::Reverse(v.created_at));
        Ok(Paged::slice(votes, page, limit))
    }

    fn log_leg_failure(
        &self,
        id: Uuid,
        leg: &'static str,
        e: crate::clients::UpstreamError,
    ) -> CoreError {
        error!(event = "distribution_leg_failed", challenge = %id, leg, %e);
        CoreError::Upstream(e)
    }

    async fn persist_distribution(
        &self,
        id: Uuid,
        dist: &Distribution,
        finalize: bool,
    ) -> CoreResult<ImpactChallenge> {
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut c = tx
                    .challenge(&id)?
                    .ok_or(CoreError::not_found("challenge"))?;
                c.distribution = Some(dist.clone());
                if finalize {
                    c.funds_distributed = true;
                    c.status = ChallengeStatus::FundsDistributed;
                }
                c.updated_at = now;
                tx.store_challenge(&c)?;
                Ok(c)
            })
            .map_err(CoreError::from_db)
    }
}

/// Leaderboard order: votes, then collected amount, then seniority.
fn sort_standings(roster: &mut [Entrepreneur]) {
    roster.sort_by(|a, b| {
        (b.vote_count, b.total_amount)
            .cmp(&(a.vote_count, a.total_amount))
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use palaver_data::challenge::PaymentStatus;

    use super::*;
    use crate::clock::ManualClock;
    use crate::database::rocksdb::Backend;
    use crate::database::DB;
    use crate::test_utils::{temp_backend, RecordingPayments};

    pub(super) struct Fixture {
        pub _guard: tempfile::TempDir,
        pub db: Arc<RwLock<Backend>>,
        pub core: ChallengeCore<Backend>,
        pub payments: Arc<RecordingPayments>,
        pub clock: ManualClock,
    }

    pub(super) fn fixture_with(params: ChallengeParams) -> Fixture {
        let (guard, db) = temp_backend();
        let db = Arc::new(RwLock::new(db));
        let clock = ManualClock::at("2026-03-10T00:00:00Z".parse().unwrap());
        let payments = RecordingPayments::new();
        let core = ChallengeCore::new(
            db.clone(),
            payments.clone(),
            Arc::new(clock.clone()),
            params,
        );
        Fixture {
            _guard: guard,
            db,
            core,
            payments,
            clock,
        }
    }

    pub(super) fn fixture() -> Fixture {
        fixture_with(ChallengeParams {
            lottery_pool_account_id: Some("acct-lottery".into()),
            commission_account_id: Some("acct-sbc".into()),
            ..Default::default()
        })
    }

    pub(super) fn new_challenge(month: u32, year: i32) -> NewChallenge {
        NewChallenge {
            month,
            year,
            campaign_name: "Impact".into(),
            start_date: "2026-03-01T00:00:00Z".parse().unwrap(),
            end_date: "2026-03-28T00:00:00Z".parse().unwrap(),
            description: LocalizedText {
                fr: "Concours".into(),
                en: "Contest".into(),
            },
        }
    }

    pub(super) fn entrepreneur(name: &str, user: Option<&str>) -> NewEntrepreneur {
        NewEntrepreneur {
            user_id: user.map(str::to_owned),
            project_name: name.into(),
            business_sector: Some("agro".into()),
            pitch: "pitch".into(),
            video_url: None,
            video_duration_secs: Some(60),
        }
    }

    #[tokio::test]
    async fn creation_links_a_seeded_tombola_month() {
        let f = fixture();

        // Close out February with a winner so March inherits the
        // exclusion list.
        f.db.read()
            .await
            .update(|tx| {
                let mut feb = palaver_data::tombola::TombolaMonth::new(
                    2,
                    2026,
                    f.clock.now(),
                );
                feb.status = palaver_data::tombola::TombolaStatus::Closed;
                feb.winners.push(palaver_data::tombola::Winner {
                    user_id: "february-winner".into(),
                    prize: "Bike".into(),
                    rank: 1,
                    winning_ticket_number: 4,
                });
                tx.store_month(&feb)
            })
            .unwrap();

        let challenge = f.core.create(new_challenge(3, 2026)).await.unwrap();
        assert_eq!(challenge.status, ChallengeStatus::Draft);

        let month = f
            .db
            .read()
            .await
            .view(|tx| {
                let id = tx.month_id_by_date(3, 2026).unwrap().unwrap();
                tx.month(&id).unwrap().unwrap()
            });
        assert_eq!(month.id, challenge.tombola_month_id);
        assert_eq!(month.linked_challenge_id, Some(challenge.id));
        assert!(month
            .previous_month_winners
            .contains("february-winner"));

        let err = f.core.create(new_challenge(3, 2026)).await;
        assert!(matches!(err, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn roster_is_capped_and_approval_flips_once() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();

        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("u1")))
            .await
            .unwrap();
        f.core
            .add_entrepreneur(c.id, entrepreneur("P2", Some("u2")))
            .await
            .unwrap();
        f.core
            .add_entrepreneur(c.id, entrepreneur("P3", Some("u3")))
            .await
            .unwrap();

        let err = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P4", None))
            .await;
        assert!(matches!(err, Err(CoreError::Conflict(_))));

        f.core.approve_entrepreneur(e1.id).await.unwrap();
        let err = f.core.approve_entrepreneur(e1.id).await;
        assert!(matches!(err, Err(CoreError::Conflict(_))));

        // Public roster lists approved entrepreneurs only.
        assert_eq!(f.core.entrepreneurs(c.id, false).await.unwrap().len(), 1);
        assert_eq!(f.core.entrepreneurs(c.id, true).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn video_cap_applies_to_the_roster() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let mut e = entrepreneur("P1", None);
        e.video_duration_secs = Some(91);
        let err = f.core.add_entrepreneur(c.id, e).await;
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn lifecycle_guards_reject_illegal_moves() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();

        let err = f.core.close_voting(c.id).await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));

        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();
        let err = f
            .core
            .set_status(c.id, ChallengeStatus::FundsDistributed)
            .await;
        assert!(matches!(err, Err(CoreError::Validation(_))));

        f.core.close_voting(c.id).await.unwrap();
        let err = f.core.set_status(c.id, ChallengeStatus::Active).await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));
    }

    #[tokio::test]
    async fn close_voting_ranks_by_votes_then_amount() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("u1")))
            .await
            .unwrap();
        let e2 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P2", Some("u2")))
            .await
            .unwrap();
        f.core.approve_entrepreneur(e1.id).await.unwrap();
        f.core.approve_entrepreneur(e2.id).await.unwrap();
        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();

        f.db.read()
            .await
            .update(|tx| {
                let mut a = tx.entrepreneur(&e1.id)?.unwrap();
                a.vote_count = 5;
                a.total_amount = 1000;
                tx.store_entrepreneur(&a)?;
                let mut b = tx.entrepreneur(&e2.id)?.unwrap();
                b.vote_count = 9;
                b.total_amount = 1800;
                tx.store_entrepreneur(&b)
            })
            .unwrap();

        let closed = f.core.close_voting(c.id).await.unwrap();
        assert_eq!(closed.status, ChallengeStatus::VotingClosed);

        let roster = f.core.entrepreneurs(c.id, true).await.unwrap();
        let winner = roster.iter().find(|e| e.id == e2.id).unwrap();
        assert_eq!(winner.rank, Some(1));
        assert!(winner.is_winner);
        let second = roster.iter().find(|e| e.id == e1.id).unwrap();
        assert_eq!(second.rank, Some(2));
        assert!(!second.is_winner);
    }

    #[tokio::test]
    async fn distribution_splits_with_remainder_into_commission() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("winner-user")))
            .await
            .unwrap();
        f.core.approve_entrepreneur(e1.id).await.unwrap();
        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();

        f.db.read()
            .await
            .update(|tx| {
                let mut ch = tx.challenge(&c.id)?.unwrap();
                ch.total_collected = 10_007;
                tx.store_challenge(&ch)?;
                let mut e = tx.entrepreneur(&e1.id)?.unwrap();
                e.vote_count = 3;
                tx.store_entrepreneur(&e)
            })
            .unwrap();

        f.core.close_voting(c.id).await.unwrap();
        let done = f.core.distribute_funds(c.id).await.unwrap();

        assert_eq!(done.status, ChallengeStatus::FundsDistributed);
        assert!(done.funds_distributed);
        let dist = done.distribution.unwrap();
        assert_eq!(dist.winner_amount, 5_003);
        assert_eq!(dist.lottery_amount, 3_002);
        assert_eq!(dist.commission_amount, 2_002);
        assert_eq!(
            dist.winner_amount + dist.lottery_amount + dist.commission_amount,
            10_007
        );
        assert!(dist.winner_txn_id.is_some());
        assert!(dist.distributed_at.is_some());

        let deposits = f.payments.deposits.lock();
        assert_eq!(deposits.len(), 3);
        assert_eq!(deposits[0].1, 5_003);
        assert_eq!(deposits[1].1, 3_002);
        assert_eq!(deposits[2].1, 2_002);

        drop(deposits);
        let err = f.core.distribute_funds(c.id).await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));
    }

    #[tokio::test]
    async fn distribution_requires_winner_account_and_config() {
        let f = fixture_with(ChallengeParams::default());
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("u1")))
            .await
            .unwrap();
        f.core.approve_entrepreneur(e1.id).await.unwrap();
        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();
        f.core.close_voting(c.id).await.unwrap();

        let err = f.core.distribute_funds(c.id).await;
        assert!(matches!(err, Err(CoreError::ForbiddenState(_))));
    }

    #[tokio::test]
    async fn failed_leg_is_not_reissued_on_retry() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("winner-user")))
            .await
            .unwrap();
        f.core.approve_entrepreneur(e1.id).await.unwrap();
        f.core
            .set_status(c.id, ChallengeStatus::Active)
            .await
            .unwrap();
        f.db.read()
            .await
            .update(|tx| {
                let mut ch = tx.challenge(&c.id)?.unwrap();
                ch.total_collected = 9_000;
                tx.store_challenge(&ch)
            })
            .unwrap();
        f.core.close_voting(c.id).await.unwrap();

        // First run: the winner leg lands, then payments go down.
        f.payments
            .fail_deposits
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = f.core.distribute_funds(c.id).await;
        assert!(matches!(err, Err(CoreError::Upstream(_))));
        // Depends on which leg failed: with failures on, nothing landed.
        assert_eq!(f.payments.deposits.lock().len(), 0);

        f.payments
            .fail_deposits
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let done = f.core.distribute_funds(c.id).await.unwrap();
        assert!(done.funds_distributed);
        assert_eq!(f.payments.deposits.lock().len(), 3);

        let votes_summary = f.core.fund_summary(c.id).await.unwrap();
        assert_eq!(votes_summary.winner_share, 4_500);
        assert!(votes_summary.funds_distributed);
    }

    #[tokio::test]
    async fn analytics_aggregates_completed_votes() {
        let f = fixture();
        let c = f.core.create(new_challenge(3, 2026)).await.unwrap();
        let e1 = f
            .core
            .add_entrepreneur(c.id, entrepreneur("P1", Some("u1")))
            .await
            .unwrap();

        let now = f.clock.now();
        f.db.read()
            .await
            .update(|tx| {
                for (i, status) in [
                    PaymentStatus::Completed,
                    PaymentStatus::Completed,
                    PaymentStatus::Pending,
                ]
                .iter()
                .enumerate()
                {
                    tx.store_vote(&ChallengeVote {
                        id: Uuid::new_v4(),
                        challenge_id: c.id,
                        entrepreneur_id: e1.id,
                        user_id: Some(format!("voter-{}", i % 2)),
                        amount_paid: 400,
                        vote_quantity: 2,
                        kind: palaver_data::challenge::VoteKind::Vote,
                        payment_status: *status,
                        payment_intent_id: Some(format!("an-{i}")),
                        tombola_ticket_ids: vec![],
                        tickets_generated: false,
                        ticket_generation_error: None,
                        created_at: now,
                        updated_at: now,
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let analytics = f.core.analytics(c.id).await.unwrap();
        assert_eq!(analytics.completed_votes, 2);
        assert_eq!(analytics.unique_voters, 2);
        assert_eq!(analytics.standings.len(), 1);

        let votes = f.core.votes(c.id, 1, 20).await.unwrap();
        assert_eq!(votes.items.len(), 3);
    }
}
