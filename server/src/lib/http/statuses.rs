// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use palaver_data::page::{PageRequest, DEFAULT_PAGE_LIMIT, MESSAGE_PAGE_LIMIT};
use palaver_data::status::{
    InteractionKind, MediaKind, StatusFilter, StatusSort, CATEGORIES,
};
use palaver_data::UserId;
use palaver_node::error::CoreError;
use palaver_node::status::{MediaUpload, NewStatus};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::AuthUser;
use super::envelope::{ok, ok_paged, ApiError, ApiResult};
use crate::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(feed).post(create))
        .route("/categories", get(categories))
        .route("/my-statuses", get(my_statuses))
        .route("/user/{user_id}", get(statuses_of))
        .route("/{id}", get(get_one).delete(delete_one))
        .route("/{id}/like", post(like).delete(unlike))
        .route("/{id}/repost", post(repost))
        .route("/{id}/reply", post(reply))
        .route("/{id}/view", post(view))
        .route("/{id}/interactions", get(interactions))
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    sort_by: Option<StatusSort>,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

async fn feed(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = PageRequest {
        page: query.page,
        limit: query.limit,
    }
    .normalize(DEFAULT_PAGE_LIMIT);
    let filter = StatusFilter {
        category: query.category,
        country: query.country,
        city: query.city,
        search: query.search,
        sort_by: query.sort_by.unwrap_or_default(),
    };
    let paged = state.statuses.feed(&user.id, &filter, page, limit).await?;
    Ok(ok_paged(paged))
}

async fn create(
    State(state): State<SharedState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut new = NewStatus::default();
    let mut media_kind: Option<MediaKind> = None;
    let mut video_duration: Option<u32> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::from(CoreError::validation(format!("bad multipart: {e}")))
    })? {
        match field.name().unwrap_or_default() {
            "category" => new.category = field.text().await.map_err(bad_field)?,
            "content" => new.content = field.text().await.map_err(bad_field)?,
            "country" => {
                new.country = Some(field.text().await.map_err(bad_field)?)
            }
            "city" => new.city = Some(field.text().await.map_err(bad_field)?),
            "region" => {
                new.region = Some(field.text().await.map_err(bad_field)?)
            }
            "media_type" => {
                let text = field.text().await.map_err(bad_field)?;
                media_kind = Some(match text.as_str() {
                    "text" => MediaKind::Text,
                    "image" => MediaKind::Image,
                    "video" => MediaKind::Video,
                    "flyer" => MediaKind::Flyer,
                    other => {
                        return Err(ApiError::from(CoreError::validation(
                            format!("unknown media type {other}"),
                        )))
                    }
                });
            }
            "video_duration" => {
                let text = field.text().await.map_err(bad_field)?;
                video_duration = Some(text.parse().map_err(|_| {
                    ApiError::from(CoreError::validation(
                        "video_duration must be a number of seconds",
                    ))
                })?);
            }
            "file" => {
                let file_name =
                    field.file_name().unwrap_or("media.bin").to_owned();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let bytes = field.bytes().await.map_err(bad_field)?;
                file = Some((file_name, mime_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    if let Some((file_name, mime_type, bytes)) = file {
        let kind = media_kind.unwrap_or_else(|| {
            if mime_type.starts_with("video/") {
                MediaKind::Video
            } else {
                MediaKind::Image
            }
        });
        new.media = Some(MediaUpload {
            kind,
            file_name,
            mime_type,
            bytes,
            video_duration_secs: video_duration,
        });
    }

    let status = state.statuses.create(&user.id, user.role, new).await?;
    Ok(ok(status))
}

fn bad_field(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::from(CoreError::validation(format!("bad multipart field: {e}")))
}

async fn categories() -> impl IntoResponse {
    ok(CATEGORIES)
}

async fn my_statuses(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = page.normalize(DEFAULT_PAGE_LIMIT);
    let paged = state.statuses.my_statuses(&user.id, page, limit).await?;
    Ok(ok_paged(paged))
}

async fn statuses_of(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(author): Path<UserId>,
    Query(page): Query<PageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = page.normalize(DEFAULT_PAGE_LIMIT);
    let paged = state
        .statuses
        .statuses_of(&author, &user.id, page, limit)
        .await?;
    Ok(ok_paged(paged))
}

async fn get_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.statuses.get(id, &user.id).await?))
}

async fn delete_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.statuses.delete(id, &user.id).await?;
    Ok(ok(json!({ "deleted": true })))
}

async fn like(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let likes = state.statuses.like(id, &user.id).await?;
    Ok(ok(json!({ "likes_count": likes })))
}

async fn unlike(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let likes = state.statuses.unlike(id, &user.id).await?;
    Ok(ok(json!({ "likes_count": likes })))
}

async fn repost(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let reposts = state.statuses.repost(id, &user.id).await?;
    Ok(ok(json!({ "reposts_count": reposts })))
}

async fn reply(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state.statuses.reply(id, &user.id).await?;
    Ok(ok(conversation))
}

async fn view(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let views = state.statuses.view(id, &user.id).await?;
    Ok(ok(json!({ "views_count": views })))
}

#[derive(Debug, Deserialize)]
struct InteractionsQuery {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

async fn interactions(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<InteractionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind = match query.kind.as_str() {
        "likes" => InteractionKind::Like,
        "reposts" => InteractionKind::Repost,
        other => {
            return Err(ApiError::from(CoreError::validation(format!(
                "unknown interaction type {other}"
            ))))
        }
    };
    let (page, limit) = PageRequest {
        page: query.page,
        limit: query.limit,
    }
    .normalize(MESSAGE_PAGE_LIMIT);
    let paged = state.statuses.interactions(id, kind, page, limit).await?;
    Ok(ok_paged(paged))
}
