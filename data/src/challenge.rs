// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Draft,
    Active,
    VotingClosed,
    FundsDistributed,
    Cancelled,
}

impl ChallengeStatus {
    /// Legal lifecycle moves. Terminal states admit none.
    pub fn can_transition_to(self, next: ChallengeStatus) -> bool {
        use ChallengeStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Cancelled)
                | (Active, VotingClosed)
                | (Active, Cancelled)
                | (VotingClosed, FundsDistributed)
                | (VotingClosed, Cancelled)
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub fr: String,
    pub en: String,
}

/// Recorded fund-distribution legs. Transaction ids are captured one by
/// one so a retried distribution never re-issues a completed deposit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub winner_amount: u64,
    pub lottery_amount: u64,
    pub commission_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_txn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lottery_txn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_txn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImpactChallenge {
    pub id: Uuid,
    /// 1..=12; `(month, year)` is unique.
    pub month: u32,
    pub year: i32,
    pub campaign_name: String,
    pub status: ChallengeStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub description: LocalizedText,
    pub tombola_month_id: Uuid,
    #[serde(default)]
    pub total_collected: u64,
    #[serde(default)]
    pub total_vote_count: u64,
    #[serde(default)]
    pub funds_distributed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entrepreneur {
    pub id: Uuid,
    pub challenge_id: Uuid,
    /// Directory account of the entrepreneur; required before funds can be
    /// distributed to them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_sector: Option<String>,
    pub pitch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration_secs: Option<u32>,
    /// Denormalized tallies, bumped on every confirmed payment.
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub total_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default)]
    pub is_winner: bool,
    #[serde(default)]
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// Counts for the leaderboard and mints tombola tickets, within the cap.
    Vote,
    /// Pure contribution: counts for the leaderboard, never mints tickets.
    Support,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeVote {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub entrepreneur_id: Uuid,
    /// Absent for anonymous support payments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub amount_paid: u64,
    /// `amount_paid / vote_price`.
    pub vote_quantity: u64,
    pub kind: VoteKind,
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub tombola_ticket_ids: Vec<String>,
    #[serde(default)]
    pub tickets_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_generation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of splitting a collected total into the 50/30/20 legs. Floors
/// every share and folds the rounding remainder into the commission, so
/// the three legs always sum exactly to the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundSplit {
    pub winner: u64,
    pub lottery: u64,
    pub commission: u64,
}

pub fn split_funds(total: u64) -> FundSplit {
    let winner = total * 50 / 100;
    let lottery = total * 30 / 100;
    let commission = total * 20 / 100;
    let remainder = total - (winner + lottery + commission);
    FundSplit {
        winner,
        lottery,
        commission: commission + remainder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_folds_remainder_into_commission() {
        let s = split_funds(10_007);
        assert_eq!(s.winner, 5_003);
        assert_eq!(s.lottery, 3_002);
        assert_eq!(s.commission, 2_002);
        assert_eq!(s.winner + s.lottery + s.commission, 10_007);
    }

    #[test]
    fn split_is_exact_for_round_totals() {
        let s = split_funds(10_000);
        assert_eq!((s.winner, s.lottery, s.commission), (5_000, 3_000, 2_000));
    }

    #[test]
    fn split_sums_to_total_for_all_residues() {
        for total in 0..100u64 {
            let s = split_funds(total);
            assert_eq!(s.winner + s.lottery + s.commission, total);
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use ChallengeStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(VotingClosed));
        assert!(VotingClosed.can_transition_to(FundsDistributed));
        assert!(Active.can_transition_to(Cancelled));

        assert!(!Draft.can_transition_to(VotingClosed));
        assert!(!FundsDistributed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
    }
}
