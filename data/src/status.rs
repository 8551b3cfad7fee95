// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::UserSnapshot;
use crate::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Text,
    Image,
    Video,
    Flyer,
}

/// Verdict of a moderation pass over a status' media.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    Warn,
    Block,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationOutcome {
    pub action: ModerationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Raw per-label scores as returned by the provider, for audit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<(String, f64)>,
}

impl ModerationOutcome {
    pub fn allow() -> Self {
        Self {
            action: ModerationAction::Allow,
            reason: None,
            scores: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub views: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: Uuid,
    pub author_id: UserId,
    pub category: String,
    pub content: String,
    pub media_kind: MediaKind,
    /// Canonical `storage://` path when the status carries media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub counts: StatusCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<ModerationOutcome>,
    /// Set when moderation returned `Warn`; the status stays visible but
    /// clients render it behind a warning.
    #[serde(default)]
    pub content_warned: bool,
    #[serde(default = "default_true")]
    pub approved: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_repost: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_status_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Status {
    /// Whether the status is currently servable to readers.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.deleted && self.approved && self.expires_at > now
    }

    pub fn media_opaque_path(&self) -> Option<&str> {
        self.media_url
            .as_deref()
            .and_then(|u| u.strip_prefix(crate::message::STORAGE_SCHEME))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Repost,
    View,
}

/// One recorded reaction. `(status, user, Like)` and `(status, user,
/// Repost)` are unique; views keep only the latest timestamp per viewer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusInteraction {
    pub status_id: Uuid,
    pub user_id: UserId,
    pub kind: InteractionKind,
    pub created_at: DateTime<Utc>,
}

/// A status as served to a specific viewer: author snapshot, the viewer's
/// own reactions, and a signed media URL in place of the opaque path.
#[derive(Clone, Debug, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<UserSnapshot>,
    pub is_liked: bool,
    pub is_reposted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_signed_url: Option<String>,
}

/// Feed ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSort {
    #[default]
    Recent,
    Popular,
}

/// Feed filter set, straight from the query string.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub category: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: StatusSort,
}

/// A publishable category. Labels are product data and deliberately not
/// localized server-side.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CategoryDef {
    pub key: &'static str,
    pub label: &'static str,
    pub admin_only: bool,
}

pub const CATEGORIES: &[CategoryDef] = &[
    CategoryDef {
        key: "annonces",
        label: "Annonces officielles",
        admin_only: true,
    },
    CategoryDef {
        key: "affaires",
        label: "Affaires",
        admin_only: false,
    },
    CategoryDef {
        key: "emploi",
        label: "Emploi",
        admin_only: false,
    },
    CategoryDef {
        key: "immobilier",
        label: "Immobilier",
        admin_only: false,
    },
    CategoryDef {
        key: "culture",
        label: "Culture",
        admin_only: false,
    },
    CategoryDef {
        key: "sport",
        label: "Sport",
        admin_only: false,
    },
    CategoryDef {
        key: "divers",
        label: "Divers",
        admin_only: false,
    },
];

pub fn category(key: &str) -> Option<&'static CategoryDef> {
    CATEGORIES.iter().find(|c| c.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(now: DateTime<Utc>) -> Status {
        Status {
            id: Uuid::new_v4(),
            author_id: "author".into(),
            category: "divers".into(),
            content: "bonjour".into(),
            media_kind: MediaKind::Text,
            media_url: None,
            video_duration_secs: None,
            country: None,
            city: None,
            region: None,
            counts: StatusCounts::default(),
            moderation: None,
            content_warned: false,
            approved: true,
            expires_at: now + chrono::Duration::hours(24),
            deleted: false,
            deleted_at: None,
            is_repost: false,
            original_status_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn liveness_follows_expiry_and_flags() {
        let now = Utc::now();
        let mut s = status(now);
        assert!(s.is_live(now));
        assert!(!s.is_live(now + chrono::Duration::hours(25)));

        s.deleted = true;
        assert!(!s.is_live(now));
    }

    #[test]
    fn admin_only_categories_are_flagged() {
        assert!(category("annonces").unwrap().admin_only);
        assert!(!category("divers").unwrap().admin_only);
        assert!(category("nope").is_none());
    }

    #[test]
    fn media_opaque_path_only_for_canonical_urls() {
        let now = Utc::now();
        let mut s = status(now);
        s.media_url = Some("storage://statuses/x.jpg".into());
        assert_eq!(s.media_opaque_path(), Some("statuses/x.jpg"));
        s.media_url = Some("https://cdn/x.jpg".into());
        assert_eq!(s.media_opaque_path(), None);
    }
}
