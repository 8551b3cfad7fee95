// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use palaver_data::page::{PageRequest, DEFAULT_PAGE_LIMIT, MESSAGE_PAGE_LIMIT};
use palaver_data::UserId;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::AuthUser;
use super::envelope::{ok, ok_paged, ApiResponse, ApiResult};
use crate::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/archived", get(list_archived))
        .route("/bulk-delete", post(bulk_delete))
        .route("/{id}", get(get_one).delete(delete_one))
        .route("/{id}/messages", get(list_messages))
        .route("/{id}/archive", post(archive))
        .route("/{id}/unarchive", post(unarchive))
        .route("/{id}/accept", post(accept))
        .route("/{id}/report", post(report))
        .route("/{id}/read", patch(mark_read))
}

async fn list(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = page.normalize(DEFAULT_PAGE_LIMIT);
    let paged = state.conversations.list(&user.id, page, limit).await?;
    Ok(ok_paged(paged))
}

async fn list_archived(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(page): Query<PageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = page.normalize(DEFAULT_PAGE_LIMIT);
    let paged = state
        .conversations
        .list_archived(&user.id, page, limit)
        .await?;
    Ok(ok_paged(paged))
}

#[derive(Debug, Deserialize)]
struct CreateConversation {
    participant_id: UserId,
}

async fn create(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<CreateConversation>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state
        .conversations
        .get_or_create_direct(&user.id, &body.participant_id)
        .await?;
    Ok(ok(conversation))
}

async fn get_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.conversations.get(id, &user.id).await?))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(default)]
    group_by_date: Option<bool>,
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

async fn list_messages(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = PageRequest {
        page: query.page,
        limit: query.limit,
    }
    .normalize(MESSAGE_PAGE_LIMIT);

    if query.group_by_date.unwrap_or(true) {
        let (groups, pagination) = state
            .messages
            .list_grouped(id, &user.id, page, limit)
            .await?;
        Ok(Json(ApiResponse {
            success: true,
            message: None,
            data: Some(json!({ "groups": groups })),
            pagination: Some(pagination),
        })
        .into_response())
    } else {
        let (messages, pagination) =
            state.messages.list(id, &user.id, page, limit).await?;
        Ok(Json(ApiResponse {
            success: true,
            message: None,
            data: Some(json!({ "messages": messages })),
            pagination: Some(pagination),
        })
        .into_response())
    }
}

/// DELETE hides the conversation for the caller only; the document (and
/// the other participant's view) survives.
async fn delete_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.conversations.archive(id, &user.id).await?;
    Ok(ok(json!({ "deleted": true })))
}

async fn archive(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.conversations.archive(id, &user.id).await?;
    Ok(ok(json!({ "archived": true })))
}

async fn unarchive(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.conversations.restore(id, &user.id).await?;
    Ok(ok(json!({ "archived": false })))
}

async fn accept(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.conversations.accept(id, &user.id).await?))
}

async fn report(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.conversations.report(id, &user.id).await?))
}

async fn mark_read(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let newly_read = state.conversations.mark_read(id, &user.id).await?;
    Ok(ok(json!({ "read": newly_read })))
}

#[derive(Debug, Deserialize)]
struct BulkDelete {
    conversation_ids: Vec<Uuid>,
}

async fn bulk_delete(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<BulkDelete>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .conversations
        .bulk_archive(&body.conversation_ids, &user.id)
        .await?;
    Ok(ok(json!({ "deleted": deleted })))
}
