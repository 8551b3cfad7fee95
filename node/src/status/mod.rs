// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

pub mod reaper;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use palaver_data::conversation::Conversation;
use palaver_data::directory::{Role, UserSnapshot};
use palaver_data::events::{Notification, Room, ServerEvent};
use palaver_data::message::STORAGE_SCHEME;
use palaver_data::page::Paged;
use palaver_data::status::{
    category, InteractionKind, MediaKind, ModerationAction, Status,
    StatusCounts, StatusFilter, StatusInteraction, StatusSort, StatusView,
};
use palaver_data::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::chat::ConversationCore;
use crate::clients::moderation::MediaRef;
use crate::clients::{DirectoryClient, ModerationClient, StorageClient};
use crate::clock::Clock;
use crate::database::{self, Statuses};
use crate::error::{CoreError, CoreResult};
use crate::realtime::Bus;

pub use reaper::StatusReaperSrv;

/// Repeat views by the same viewer within this window do not count.
fn view_suppression() -> chrono::Duration {
    chrono::Duration::hours(1)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusParams {
    pub default_expiry_hours: u64,
    pub max_video_secs: u32,
    pub max_content_len: usize,
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
}

impl Default for StatusParams {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24,
            max_video_secs: 30,
            max_content_len: 2000,
            reaper_interval: Duration::from_secs(600),
        }
    }
}

/// A status submission. Media arrives as a raw buffer and is uploaded to
/// the private bucket before the document is persisted.
#[derive(Debug, Default)]
pub struct NewStatus {
    pub category: String,
    pub content: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub media: Option<MediaUpload>,
}

#[derive(Debug)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub video_duration_secs: Option<u32>,
}

/// One like/repost row with its author snapshot attached.
#[derive(Clone, Debug, Serialize)]
pub struct InteractionView {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSnapshot>,
    pub created_at: DateTime<Utc>,
}

/// Ephemeral-status lifecycle: creation behind moderation, the filtered
/// feed, per-viewer interaction overlays and the reply bridge into chat.
pub struct StatusCore<DB> {
    db: Arc<RwLock<DB>>,
    conversations: Arc<ConversationCore<DB>>,
    directory: Arc<dyn DirectoryClient>,
    storage: Arc<dyn StorageClient>,
    moderation: Arc<dyn ModerationClient>,
    bus: Bus,
    clock: Arc<dyn Clock>,
    params: StatusParams,
}

impl<DB: database::DB> StatusCore<DB> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<RwLock<DB>>,
        conversations: Arc<ConversationCore<DB>>,
        directory: Arc<dyn DirectoryClient>,
        storage: Arc<dyn StorageClient>,
        moderation: Arc<dyn ModerationClient>,
        bus: Bus,
        clock: Arc<dyn Clock>,
        params: StatusParams,
    ) -> Self {
        Self {
            db,
            conversations,
            directory,
            storage,
            moderation,
            bus,
            clock,
            params,
        }
    }

    /// Validates, moderates and persists a new status, then announces it
    /// on the feed rooms.
    pub async fn create(
        &self,
        author: &str,
        role: Role,
        new: NewStatus,
    ) -> CoreResult<Status> {
        let def = category(&new.category).ok_or_else(|| {
            CoreError::validation(format!("unknown category {}", new.category))
        })?;
        if def.admin_only && !role.is_admin() {
            return Err(CoreError::forbidden(
                "ADMIN_CATEGORY",
                format!("category {} is reserved", def.key),
            ));
        }

        let content = new.content.trim().to_owned();
        if content.chars().count() > self.params.max_content_len {
            return Err(CoreError::validation(format!(
                "status content exceeds {} characters",
                self.params.max_content_len
            )));
        }
        if content.is_empty() && new.media.is_none() {
            return Err(CoreError::validation("status is empty"));
        }

        let now = self.clock.now();
        let mut media_url = None;
        let mut media_kind = MediaKind::Text;
        let mut video_duration = None;
        let mut moderation = None;
        let mut content_warned = false;

        if let Some(media) = new.media {
            if media.kind == MediaKind::Video {
                let duration = media.video_duration_secs.ok_or_else(|| {
                    CoreError::validation("video duration is required")
                })?;
                if duration > self.params.max_video_secs {
                    return Err(CoreError::validation(format!(
                        "video exceeds {} seconds",
                        self.params.max_video_secs
                    )));
                }
                video_duration = Some(duration);
            }
            media_kind = media.kind;

            let object_name = format!(
                "statuses/{author}/{}{}",
                Uuid::new_v4(),
                extension_of(&media.file_name)
            );
            let path = self
                .storage
                .upload(&object_name, &media.mime_type, media.bytes)
                .await?;

            let outcome = self.moderate(&path, media_kind).await;
            if outcome.action == ModerationAction::Block {
                return Err(CoreError::validation(format!(
                    "content rejected: {}",
                    outcome
                        .reason
                        .as_deref()
                        .unwrap_or("not allowed by moderation")
                )));
            }
            content_warned = outcome.action == ModerationAction::Warn;
            moderation = Some(outcome);
            media_url = Some(format!("{STORAGE_SCHEME}{path}"));
        }

        let status = Status {
            id: Uuid::new_v4(),
            author_id: author.to_owned(),
            category: def.key.to_owned(),
            content,
            media_kind,
            media_url,
            video_duration_secs: video_duration,
            country: new.country,
            city: new.city,
            region: new.region,
            counts: StatusCounts::default(),
            moderation,
            content_warned,
            approved: true,
            expires_at: now
                + chrono::Duration::hours(self.params.default_expiry_hours as i64),
            deleted: false,
            deleted_at: None,
            is_repost: false,
            original_status_id: None,
            created_at: now,
            updated_at: now,
        };

        self.db
            .read()
            .await
            .update(|tx| tx.store_status(&status))
            .map_err(CoreError::from_db)?;

        counter!("palaver_statuses_created_total").increment(1);

        let event = ServerEvent::StatusNew {
            status: Box::new(status.clone()),
        };
        self.bus.emit(&Room::StatusFeed, &event);
        self.bus.emit(&Room::StatusAll, &event);
        self.bus
            .emit(&Room::StatusCategory(status.category.clone()), &event);

        Ok(status)
    }

    /// The filtered, sorted, enriched feed page.
    pub async fn feed(
        &self,
        viewer: &str,
        filter: &StatusFilter,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<StatusView>> {
        let now = self.clock.now();
        let mut statuses =
            self.db.read().await.view(|tx| tx.live_statuses())?;

        statuses.retain(|s| s.is_live(now));
        if let Some(cat) = &filter.category {
            statuses.retain(|s| &s.category == cat);
        }
        if let Some(country) = &filter.country {
            statuses.retain(|s| {
                s.country.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(country))
            });
        }
        if let Some(city) = &filter.city {
            statuses.retain(|s| {
                s.city.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(city))
            });
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            statuses.retain(|s| s.content.to_lowercase().contains(&needle));
        }

        match filter.sort_by {
            // The live index already yields newest-first.
            StatusSort::Recent => {}
            StatusSort::Popular => statuses.sort_by(|a, b| {
                (b.counts.likes, b.counts.views, b.created_at).cmp(&(
                    a.counts.likes,
                    a.counts.views,
                    a.created_at,
                ))
            }),
        }

        let paged = Paged::slice(statuses, page, limit);
        let items = self.enrich(paged.items, viewer).await?;
        Ok(Paged {
            items,
            pagination: paged.pagination,
        })
    }

    /// Single status with the same enrichment as the feed.
    pub async fn get(
        &self,
        id: Uuid,
        viewer: &str,
    ) -> CoreResult<StatusView> {
        let now = self.clock.now();
        let status = self
            .db
            .read()
            .await
            .view(|tx| tx.status(&id))?
            .filter(|s| s.is_live(now))
            .ok_or_else(|| CoreError::not_found("status"))?;
        let mut views = self.enrich(vec![status], viewer).await?;
        Ok(views.remove(0))
    }

    /// The author's own statuses, including expired ones.
    pub async fn my_statuses(
        &self,
        author: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<StatusView>> {
        let statuses = self
            .db
            .read()
            .await
            .view(|tx| tx.statuses_by_author(author))?;
        let paged = Paged::slice(statuses, page, limit);
        let items = self.enrich(paged.items, author).await?;
        Ok(Paged {
            items,
            pagination: paged.pagination,
        })
    }

    /// Another user's currently live statuses.
    pub async fn statuses_of(
        &self,
        author: &str,
        viewer: &str,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<StatusView>> {
        let now = self.clock.now();
        let mut statuses = self
            .db
            .read()
            .await
            .view(|tx| tx.statuses_by_author(author))?;
        statuses.retain(|s| s.is_live(now));
        let paged = Paged::slice(statuses, page, limit);
        let items = self.enrich(paged.items, viewer).await?;
        Ok(Paged {
            items,
            pagination: paged.pagination,
        })
    }

    /// Idempotent like. Returns the resulting like count.
    pub async fn like(&self, id: Uuid, user: &str) -> CoreResult<u64> {
        let now = self.clock.now();
        let (status, changed) = self
            .mutate_live(id, |tx, status| {
                if tx.interaction_exists(&id, user, InteractionKind::Like)? {
                    return Ok(false);
                }
                tx.store_interaction(&StatusInteraction {
                    status_id: id,
                    user_id: user.to_owned(),
                    kind: InteractionKind::Like,
                    created_at: now,
                })?;
                status.counts.likes += 1;
                Ok(true)
            })
            .await?;

        if changed {
            self.emit_feed_and_category(
                &status,
                &ServerEvent::StatusLiked {
                    status_id: id,
                    user_id: user.to_owned(),
                    likes_count: status.counts.likes,
                },
            );
            if status.author_id != user {
                self.bus.emit_user(
                    &status.author_id,
                    &ServerEvent::NotificationNew {
                        notification: Notification {
                            user_id: status.author_id.clone(),
                            kind: "status_like".into(),
                            title: "New like".into(),
                            body: "Someone liked your status".into(),
                            from_user_id: Some(user.to_owned()),
                        },
                    },
                );
            }
        }
        Ok(status.counts.likes)
    }

    /// Idempotent unlike; returns the resulting like count.
    pub async fn unlike(&self, id: Uuid, user: &str) -> CoreResult<u64> {
        let (status, changed) = self
            .mutate_live(id, |tx, status| {
                if !tx.delete_interaction(&id, user, InteractionKind::Like)? {
                    return Ok(false);
                }
                status.counts.likes = status.counts.likes.saturating_sub(1);
                Ok(true)
            })
            .await?;

        if changed {
            self.emit_feed_and_category(
                &status,
                &ServerEvent::StatusUnliked {
                    status_id: id,
                    user_id: user.to_owned(),
                    likes_count: status.counts.likes,
                },
            );
        }
        Ok(status.counts.likes)
    }

    /// Idempotent repost marker; returns the resulting repost count.
    pub async fn repost(&self, id: Uuid, user: &str) -> CoreResult<u64> {
        let now = self.clock.now();
        let (status, changed) = self
            .mutate_live(id, |tx, status| {
                if tx.interaction_exists(&id, user, InteractionKind::Repost)? {
                    return Ok(false);
                }
                tx.store_interaction(&StatusInteraction {
                    status_id: id,
                    user_id: user.to_owned(),
                    kind: InteractionKind::Repost,
                    created_at: now,
                })?;
                status.counts.reposts += 1;
                Ok(true)
            })
            .await?;

        if changed {
            self.emit_feed_and_category(
                &status,
                &ServerEvent::StatusReposted {
                    status_id: id,
                    user_id: user.to_owned(),
                    reposts_count: status.counts.reposts,
                },
            );
        }
        Ok(status.counts.reposts)
    }

    /// Counts a view unless the same viewer was recorded within the past
    /// hour. Returns the resulting view count.
    pub async fn view(&self, id: Uuid, user: &str) -> CoreResult<u64> {
        let now = self.clock.now();
        let (status, _) = self
            .mutate_live(id, |tx, status| {
                if let Some(last) = tx.last_view_at(&id, user)? {
                    if now - last < view_suppression() {
                        return Ok(false);
                    }
                }
                tx.record_view(&id, user, now)?;
                status.counts.views += 1;
                Ok(true)
            })
            .await?;
        Ok(status.counts.views)
    }

    /// Opens (or finds) the reply conversation between the replying user
    /// and the status author.
    pub async fn reply(
        &self,
        id: Uuid,
        user: &str,
    ) -> CoreResult<Conversation> {
        let now = self.clock.now();
        let status = self
            .db
            .read()
            .await
            .view(|tx| tx.status(&id))?
            .filter(|s| s.is_live(now))
            .ok_or_else(|| CoreError::not_found("status"))?;

        let conversation = self
            .conversations
            .get_or_create_status_reply(id, user, &status.author_id)
            .await?;

        self.mutate_live(id, |_, status| {
            status.counts.replies += 1;
            Ok(true)
        })
        .await?;

        Ok(conversation)
    }

    /// Author-only soft delete.
    pub async fn delete(&self, id: Uuid, user: &str) -> CoreResult<()> {
        let now = self.clock.now();
        let user = user.to_owned();
        let status = self
            .db
            .read()
            .await
            .update(|tx| {
                let mut status = tx
                    .status(&id)?
                    .filter(|s| !s.deleted)
                    .ok_or(CoreError::not_found("status"))?;
                if status.author_id != user {
                    return Err(CoreError::forbidden(
                        "NOT_STATUS_AUTHOR",
                        "only the author can delete a status",
                    )
                    .into());
                }
                status.deleted = true;
                status.deleted_at = Some(now);
                status.updated_at = now;
                tx.store_status(&status)?;
                Ok(status)
            })
            .map_err(CoreError::from_db)?;

        self.emit_feed_and_category(
            &status,
            &ServerEvent::StatusDeleted { status_id: id },
        );
        Ok(())
    }

    /// Who liked or reposted, newest rows last, with author snapshots.
    pub async fn interactions(
        &self,
        id: Uuid,
        kind: InteractionKind,
        page: u64,
        limit: u64,
    ) -> CoreResult<Paged<InteractionView>> {
        if kind == InteractionKind::View {
            return Err(CoreError::validation(
                "view interactions are not listable",
            ));
        }
        let rows = self
            .db
            .read()
            .await
            .view(|tx| tx.interactions_of(&id, kind))?;
        let paged = Paged::slice(rows, page, limit);

        let ids: Vec<UserId> =
            paged.items.iter().map(|i| i.user_id.clone()).collect();
        let users = self.directory.users_by_id(&ids).await?;
        Ok(paged.map(|i| InteractionView {
            user: users.get(&i.user_id).cloned(),
            user_id: i.user_id,
            created_at: i.created_at,
        }))
    }

    /// Loads a live status, applies a mutation, and persists it when the
    /// closure reports a change. Returns the (possibly updated) document.
    async fn mutate_live<F>(
        &self,
        id: Uuid,
        mutate: F,
    ) -> CoreResult<(Status, bool)>
    where
        F: for<'a> Fn(
            &mut <DB as database::DB>::P<'a>,
            &mut Status,
        ) -> anyhow::Result<bool>,
    {
        let now = self.clock.now();
        self.db
            .read()
            .await
            .update(|tx| {
                let mut status = tx
                    .status(&id)?
                    .filter(|s| s.is_live(now))
                    .ok_or(CoreError::not_found("status"))?;
                let changed = mutate(tx, &mut status)?;
                if changed {
                    status.updated_at = now;
                    tx.store_status(&status)?;
                }
                Ok((status, changed))
            })
            .map_err(CoreError::from_db)
    }

    fn emit_feed_and_category(&self, status: &Status, event: &ServerEvent) {
        self.bus.emit(&Room::StatusFeed, event);
        self.bus
            .emit(&Room::StatusCategory(status.category.clone()), event);
    }

    /// Attaches author snapshots, the viewer overlay and signed media
    /// URLs to a page of statuses.
    async fn enrich(
        &self,
        statuses: Vec<Status>,
        viewer: &str,
    ) -> CoreResult<Vec<StatusView>> {
        let author_ids: Vec<UserId> = {
            let mut ids: Vec<UserId> =
                statuses.iter().map(|s| s.author_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let authors = self.directory.users_by_id(&author_ids).await?;

        let ids: Vec<Uuid> = statuses.iter().map(|s| s.id).collect();
        let overlay = {
            let viewer = viewer.to_owned();
            self.db
                .read()
                .await
                .view(|tx| tx.viewer_overlay(&ids, &viewer))?
        };

        let paths: Vec<String> = statuses
            .iter()
            .filter_map(|s| s.media_opaque_path())
            .map(str::to_owned)
            .collect();
        let urls = if paths.is_empty() {
            HashMap::new()
        } else {
            match self.storage.signed_urls(&paths).await {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(event = "status media signing failed", %e);
                    HashMap::new()
                }
            }
        };

        Ok(statuses
            .into_iter()
            .map(|s| {
                let media_signed_url = s
                    .media_opaque_path()
                    .and_then(|p| urls.get(p).cloned());
                StatusView {
                    author: authors.get(&s.author_id).cloned(),
                    is_liked: overlay
                        .contains(&(s.id, InteractionKind::Like)),
                    is_reposted: overlay
                        .contains(&(s.id, InteractionKind::Repost)),
                    media_signed_url,
                    status: s,
                }
            })
            .collect())
    }

    /// Moderation with the fail-open policy: a provider outage publishes
    /// the media unmoderated rather than blocking the author.
    async fn moderate(
        &self,
        path: &str,
        kind: MediaKind,
    ) -> palaver_data::status::ModerationOutcome {
        let signed = match self.storage.signed_url(path).await {
            Ok(signed) => signed,
            Err(e) => {
                warn!(event = "moderation skipped, no signed url", %e);
                return palaver_data::status::ModerationOutcome::allow();
            }
        };
        let media = match kind {
            MediaKind::Video => MediaRef::Video(&signed.url),
            _ => MediaRef::Image(&signed.url),
        };
        match self.moderation.moderate(media).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(event = "moderation unavailable, failing open", %e);
                palaver_data::status::ModerationOutcome::allow()
            }
        }
    }
}

fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use palaver_data::status::ModerationOutcome;

    use super::*;
    use crate::chat::ChatParams;
    use crate::clock::ManualClock;
    use crate::database::rocksdb::Backend;
    use crate::test_utils::{
        temp_backend, MemoryStorage, StaticDirectory, StaticModeration,
    };

    struct Fixture {
        _guard: tempfile::TempDir,
        statuses: StatusCore<Backend>,
        moderation: Arc<StaticModeration>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let (guard, db) = temp_backend();
        let db = Arc::new(RwLock::new(db));
        let clock = ManualClock::at("2026-03-05T12:00:00Z".parse().unwrap());
        let directory = StaticDirectory::new();
        directory.insert_plain_user("author");
        directory.insert_plain_user("reader");
        let moderation = StaticModeration::allowing();
        let bus = Bus::new();

        let conversations = Arc::new(ConversationCore::new(
            db.clone(),
            directory.clone(),
            bus.clone(),
            Arc::new(clock.clone()),
            ChatParams::default(),
        ));
        let statuses = StatusCore::new(
            db,
            conversations,
            directory,
            MemoryStorage::new(),
            moderation.clone(),
            bus,
            Arc::new(clock.clone()),
            StatusParams::default(),
        );
        Fixture {
            _guard: guard,
            statuses,
            moderation,
            clock,
        }
    }

    fn text_status(content: &str) -> NewStatus {
        NewStatus {
            category: "divers".into(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn image(bytes: Vec<u8>) -> NewStatus {
        NewStatus {
            category: "divers".into(),
            content: "look".into(),
            media: Some(MediaUpload {
                kind: MediaKind::Image,
                file_name: "x.jpg".into(),
                mime_type: "image/jpeg".into(),
                bytes,
                video_duration_secs: None,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn moderation_block_aborts_with_the_reason() {
        let f = fixture();
        f.moderation.set_outcome(ModerationOutcome {
            action: ModerationAction::Block,
            reason: Some("explicit imagery".into()),
            scores: vec![("nudity".into(), 0.97)],
        });

        let err = f
            .statuses
            .create("author", Role::User, image(vec![0; 8]))
            .await;
        match err {
            Err(CoreError::Validation(msg)) => {
                assert!(msg.contains("explicit imagery"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        // Nothing was persisted.
        let feed = f
            .statuses
            .feed("reader", &StatusFilter::default(), 1, 20)
            .await
            .unwrap();
        assert!(feed.items.is_empty());
    }

    #[tokio::test]
    async fn moderation_warn_publishes_with_flag() {
        let f = fixture();
        f.moderation.set_outcome(ModerationOutcome {
            action: ModerationAction::Warn,
            reason: Some("possible violence".into()),
            scores: vec![("violence".into(), 0.7)],
        });

        let status = f
            .statuses
            .create("author", Role::User, image(vec![0; 8]))
            .await
            .unwrap();
        assert!(status.content_warned);
        assert!(!status.deleted);
    }

    #[tokio::test]
    async fn moderation_outage_fails_open() {
        let f = fixture();
        f.moderation
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let status = f
            .statuses
            .create("author", Role::User, image(vec![0; 8]))
            .await
            .unwrap();
        assert!(!status.content_warned);
    }

    #[tokio::test]
    async fn admin_categories_are_fenced() {
        let f = fixture();
        let mut new = text_status("annonce importante");
        new.category = "annonces".into();

        let err = f.statuses.create("author", Role::User, new).await;
        assert!(matches!(err, Err(CoreError::Forbidden { .. })));

        let mut new = text_status("annonce importante");
        new.category = "annonces".into();
        f.statuses.create("author", Role::Admin, new).await.unwrap();
    }

    #[tokio::test]
    async fn like_unlike_round_trip_restores_the_count() {
        let f = fixture();
        let s = f
            .statuses
            .create("author", Role::User, text_status("salut"))
            .await
            .unwrap();

        assert_eq!(f.statuses.like(s.id, "reader").await.unwrap(), 1);
        // A second like is a no-op.
        assert_eq!(f.statuses.like(s.id, "reader").await.unwrap(), 1);

        assert_eq!(f.statuses.unlike(s.id, "reader").await.unwrap(), 0);
        assert_eq!(f.statuses.unlike(s.id, "reader").await.unwrap(), 0);

        let view = f.statuses.get(s.id, "reader").await.unwrap();
        assert_eq!(view.status.counts.likes, 0);
        assert!(!view.is_liked);
    }

    #[tokio::test]
    async fn views_are_suppressed_within_an_hour() {
        let f = fixture();
        let s = f
            .statuses
            .create("author", Role::User, text_status("regardez"))
            .await
            .unwrap();

        assert_eq!(f.statuses.view(s.id, "reader").await.unwrap(), 1);
        f.clock.advance(chrono::Duration::minutes(30));
        assert_eq!(f.statuses.view(s.id, "reader").await.unwrap(), 1);

        f.clock.advance(chrono::Duration::minutes(31));
        assert_eq!(f.statuses.view(s.id, "reader").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn feed_filters_and_popular_sort() {
        let f = fixture();
        let a = f
            .statuses
            .create("author", Role::User, text_status("offre de travail"))
            .await
            .unwrap();
        let mut emploi = text_status("recrutement ingénieur");
        emploi.category = "emploi".into();
        let b = f
            .statuses
            .create("author", Role::User, emploi)
            .await
            .unwrap();

        f.statuses.like(b.id, "reader").await.unwrap();

        let feed = f
            .statuses
            .feed(
                "reader",
                &StatusFilter {
                    category: Some("emploi".into()),
                    ..Default::default()
                },
                1,
                20,
            )
            .await
            .unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].status.id, b.id);
        assert!(feed.items[0].is_liked);

        let popular = f
            .statuses
            .feed(
                "reader",
                &StatusFilter {
                    sort_by: StatusSort::Popular,
                    ..Default::default()
                },
                1,
                20,
            )
            .await
            .unwrap();
        assert_eq!(popular.items[0].status.id, b.id);
        assert_eq!(popular.items[1].status.id, a.id);

        let search = f
            .statuses
            .feed(
                "reader",
                &StatusFilter {
                    search: Some("INGÉNIEUR".to_lowercase()),
                    ..Default::default()
                },
                1,
                20,
            )
            .await
            .unwrap();
        assert_eq!(search.items.len(), 1);
    }

    #[tokio::test]
    async fn expired_statuses_drop_out_of_reads() {
        let f = fixture();
        let s = f
            .statuses
            .create("author", Role::User, text_status("éphémère"))
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::hours(25));
        let err = f.statuses.get(s.id, "reader").await;
        assert!(matches!(err, Err(CoreError::NotFound { .. })));

        let feed = f
            .statuses
            .feed("reader", &StatusFilter::default(), 1, 20)
            .await
            .unwrap();
        assert!(feed.items.is_empty());

        // The author still sees it in their own history.
        let mine = f.statuses.my_statuses("author", 1, 20).await.unwrap();
        assert_eq!(mine.items.len(), 1);
    }

    #[tokio::test]
    async fn replying_to_own_status_is_rejected() {
        let f = fixture();
        let s = f
            .statuses
            .create("author", Role::User, text_status("hello"))
            .await
            .unwrap();

        let err = f.statuses.reply(s.id, "author").await;
        assert!(matches!(err, Err(CoreError::Validation(_))));

        let conv = f.statuses.reply(s.id, "reader").await.unwrap();
        assert!(conv.is_participant("reader"));
        assert!(conv.is_participant("author"));

        let view = f.statuses.get(s.id, "reader").await.unwrap();
        assert_eq!(view.status.counts.replies, 1);

        // Replying again reuses the conversation.
        let again = f.statuses.reply(s.id, "reader").await.unwrap();
        assert_eq!(again.id, conv.id);
    }

    #[tokio::test]
    async fn delete_is_author_only_and_soft() {
        let f = fixture();
        let s = f
            .statuses
            .create("author", Role::User, text_status("bye"))
            .await
            .unwrap();

        let err = f.statuses.delete(s.id, "reader").await;
        assert!(matches!(err, Err(CoreError::Forbidden { .. })));

        f.statuses.delete(s.id, "author").await.unwrap();
        let err = f.statuses.get(s.id, "reader").await;
        assert!(matches!(err, Err(CoreError::NotFound { .. })));
    }
}
