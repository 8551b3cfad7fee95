// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps a payment session id to the outcome of its first successful
/// confirmation. Written in the same transaction as the confirmation
/// itself; a later delivery of the same webhook finds it and stops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdemRecord {
    pub session_id: String,
    /// Identifier of the entity the confirmation produced (vote id or
    /// ticket id).
    pub outcome: String,
    pub created_at: DateTime<Utc>,
}
