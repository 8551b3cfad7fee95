// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Length of the opaque, globally unique ticket token.
pub const TICKET_ID_LEN: usize = 12;

/// Fixed prize labels by rank (1-based). Part of the external contract.
pub const PRIZES: [&str; 3] = ["Bike", "Phone", "100k FCFA"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombolaStatus {
    Open,
    Drawing,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub user_id: UserId,
    pub prize: String,
    /// 1-based rank.
    pub rank: u8,
    pub winning_ticket_number: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TombolaMonth {
    pub id: Uuid,
    /// 1..=12.
    pub month: u32,
    pub year: i32,
    pub status: TombolaStatus,
    /// Monotonic counter backing the dense 1-based ticket numbering.
    #[serde(default)]
    pub last_ticket_number: u64,
    #[serde(default)]
    pub winners: Vec<Winner>,
    /// Users excluded from this month's draw because they won last month.
    #[serde(default)]
    pub previous_month_winners: HashSet<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_challenge_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draw_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TombolaMonth {
    pub fn new(month: u32, year: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            month,
            year,
            status: TombolaStatus::Open,
            last_ticket_number: 0,
            winners: Vec::new(),
            previous_month_winners: HashSet::new(),
            linked_challenge_id: None,
            draw_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `(month, year)` of the calendar month preceding the given one, rolling
/// January back to the previous year's December.
pub fn previous_month(month: u32, year: i32) -> (u32, i32) {
    if month == 1 {
        (12, year - 1)
    } else {
        (month - 1, year)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    DirectPurchase,
    ChallengeVote,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TombolaTicket {
    /// Opaque globally unique token, distinct from the per-month number.
    pub ticket_id: String,
    pub user_id: UserId,
    pub tombola_month_id: Uuid,
    /// Dense 1-based index within the month.
    pub ticket_number: u64,
    pub weight: f64,
    /// 1-based index within `(user, month)`; determines the weight.
    pub user_ticket_index: u32,
    pub source: TicketSource,
    pub payment_intent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_vote_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Diminishing weight of a user's n-th ticket of the month. `None` past
/// the hard ceiling of 25.
pub fn ticket_weight(user_ticket_index: u32) -> Option<f64> {
    match user_ticket_index {
        1..=3 => Some(1.0),
        4..=15 => Some(0.6),
        16..=25 => Some(0.3),
        _ => None,
    }
}

/// A fresh opaque ticket token.
pub fn opaque_ticket_id<R: Rng>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(TICKET_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_piecewise_in_the_index() {
        assert_eq!(ticket_weight(1), Some(1.0));
        assert_eq!(ticket_weight(3), Some(1.0));
        assert_eq!(ticket_weight(4), Some(0.6));
        assert_eq!(ticket_weight(15), Some(0.6));
        assert_eq!(ticket_weight(16), Some(0.3));
        assert_eq!(ticket_weight(25), Some(0.3));
        assert_eq!(ticket_weight(26), None);
        assert_eq!(ticket_weight(0), None);
    }

    #[test]
    fn previous_month_rolls_over_january() {
        assert_eq!(previous_month(1, 2026), (12, 2025));
        assert_eq!(previous_month(7, 2026), (6, 2026));
    }

    #[test]
    fn ticket_ids_are_twelve_alphanumeric_chars() {
        let mut rng = rand::thread_rng();
        let id = opaque_ticket_id(&mut rng);
        assert_eq!(id.len(), TICKET_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
