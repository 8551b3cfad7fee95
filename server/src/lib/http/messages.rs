// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use palaver_data::message::MessageKind;
use palaver_node::chat::message::{DocumentUpload, SendPayload};
use palaver_node::error::CoreError;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::AuthUser;
use super::envelope::{ok, ApiError, ApiResult};
use crate::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(send))
        .route("/document", post(send_document))
        .route("/bulk-delete", post(bulk_delete))
        .route("/forward", post(forward))
        .route("/{id}", get(get_one).delete(delete_one))
        .route("/{id}/document-url", get(document_url))
}

#[derive(Debug, Deserialize)]
struct SendMessage {
    conversation_id: Uuid,
    content: String,
    #[serde(default)]
    kind: Option<MessageKind>,
    #[serde(default)]
    reply_to_id: Option<Uuid>,
}

async fn send(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<SendMessage>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .messages
        .send(
            body.conversation_id,
            &user.id,
            user.role,
            SendPayload {
                kind: body.kind.unwrap_or(MessageKind::Text),
                content: body.content,
                document: None,
                reply_to_id: body.reply_to_id,
            },
        )
        .await?;
    Ok(ok(message))
}

async fn send_document(
    State(state): State<SharedState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut conversation_id: Option<Uuid> = None;
    let mut caption = String::new();
    let mut upload: Option<DocumentUpload> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::from(CoreError::validation(format!("bad multipart: {e}")))
    })? {
        match field.name().unwrap_or_default() {
            "conversation_id" => {
                let text = field.text().await.map_err(bad_field)?;
                conversation_id = Some(text.parse().map_err(|_| {
                    ApiError::from(CoreError::validation(
                        "conversation_id is not a valid id",
                    ))
                })?);
            }
            "caption" | "content" => {
                caption = field.text().await.map_err(bad_field)?;
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .unwrap_or("document.bin")
                    .to_owned();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let bytes = field.bytes().await.map_err(bad_field)?;
                upload = Some(DocumentUpload {
                    file_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                    caption: String::new(),
                });
            }
            _ => {}
        }
    }

    let conversation_id = conversation_id.ok_or_else(|| {
        ApiError::from(CoreError::validation("conversation_id is required"))
    })?;
    let mut upload = upload.ok_or_else(|| {
        ApiError::from(CoreError::validation("file is required"))
    })?;
    upload.caption = caption;

    let (message, signed) = state
        .messages
        .send_document(conversation_id, &user.id, user.role, upload)
        .await?;
    Ok(ok(json!({
        "message": message,
        "document_signed_url": signed.url,
        "document_url_expires_in": signed.expires_in_secs,
    })))
}

fn bad_field(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::from(CoreError::validation(format!("bad multipart field: {e}")))
}

async fn get_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.messages.get(id, &user.id).await?))
}

/// The sender deletes for everyone; any other participant merely hides
/// the message from their own view.
async fn delete_one(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    match state.messages.soft_delete(id, &user.id).await {
        Ok(()) => Ok(ok(json!({ "deleted": true }))),
        Err(CoreError::Forbidden { .. }) => {
            state.messages.delete_for_user(id, &user.id).await?;
            Ok(ok(json!({ "deleted_for_me": true })))
        }
        Err(e) => Err(e.into()),
    }
}

async fn document_url(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let signed = state.messages.document_url(id, &user.id).await?;
    Ok(ok(json!({
        "url": signed.url,
        "expires_in": signed.expires_in_secs,
    })))
}

#[derive(Debug, Deserialize)]
struct BulkDelete {
    message_ids: Vec<Uuid>,
}

async fn bulk_delete(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<BulkDelete>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .messages
        .bulk_delete_for_user(&body.message_ids, &user.id)
        .await?;
    Ok(ok(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct Forward {
    message_ids: Vec<Uuid>,
    conversation_ids: Vec<Uuid>,
}

async fn forward(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<Forward>,
) -> ApiResult<impl IntoResponse> {
    let forwarded = state
        .messages
        .forward(
            &body.message_ids,
            &body.conversation_ids,
            &user.id,
            user.role,
        )
        .await?;
    Ok(ok(forwarded))
}
