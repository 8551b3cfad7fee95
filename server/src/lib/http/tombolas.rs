// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use palaver_data::tombola::TombolaStatus;
use palaver_node::clients::payments::STATUS_SUCCEEDED;
use palaver_node::error::CoreError;
use palaver_node::tombola::TicketIntentMetadata;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::{AdminUser, AuthUser, ServiceAuth};
use super::envelope::{ok, ok_message, ApiError, ApiResponse, ApiResult};
use crate::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list))
        .route("/current", get(current))
        .route("/current/buy-ticket", post(buy_ticket))
        .route("/tickets/me", get(my_tickets))
        .route("/{month_id}/winners", get(winners))
        .route(
            "/webhooks/payment-confirmation",
            post(payment_confirmation),
        )
        .route("/admin", post(create_month))
        .route("/admin/{id}", get(admin_get))
        .route("/admin/{id}/status", patch(set_status))
        .route("/admin/{id}/draw", post(draw))
        .route("/admin/{id}/tickets", get(admin_tickets))
        .route("/admin/{id}/ticket-numbers", get(admin_ticket_numbers))
}

async fn list(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.months().await?))
}

async fn current(
    State(state): State<SharedState>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.current().await?))
}

async fn winners(
    State(state): State<SharedState>,
    Path(month_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.winners(month_id).await?))
}

async fn buy_ticket(
    State(state): State<SharedState>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.buy_ticket(&user.id).await?))
}

async fn my_tickets(
    State(state): State<SharedState>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.tickets_of_user(&user.id).await?))
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    session_id: String,
    status: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// Gateway confirmation for direct ticket purchases. Bad metadata is a
/// permanent 4xx so the sender stops retrying; an over-cap confirmation
/// is acknowledged and left to manual reconciliation.
async fn payment_confirmation(
    State(state): State<SharedState>,
    _service: ServiceAuth,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<impl IntoResponse> {
    if payload.status != STATUS_SUCCEEDED {
        return Ok(ok_message(format!(
            "ignored payment status {}",
            payload.status
        ))
        .into_response());
    }
    let metadata: TicketIntentMetadata =
        serde_json::from_value(payload.metadata).map_err(|e| {
            ApiError::from(CoreError::validation(format!(
                "bad ticket metadata: {e}"
            )))
        })?;

    match state
        .tombola
        .confirm_ticket_purchase(&payload.session_id, &metadata)
        .await
    {
        Ok(ticket) => Ok(ok(ticket).into_response()),
        Err(CoreError::Integrity(msg)) => Ok(Json(ApiResponse::<()> {
            success: false,
            message: Some(msg),
            data: None,
            pagination: None,
        })
        .into_response()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateMonth {
    month: u32,
    year: i32,
}

async fn create_month(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Json(body): Json<CreateMonth>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.create_month(body.month, body.year).await?))
}

async fn admin_get(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.month(id).await?))
}

#[derive(Debug, Deserialize)]
struct SetStatus {
    status: TombolaStatus,
}

async fn set_status(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatus>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.set_status(id, body.status).await?))
}

async fn draw(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.draw_winners(id).await?))
}

async fn admin_tickets(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.tombola.tickets_of_month(id).await?))
}

async fn admin_ticket_numbers(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let numbers = state.tombola.ticket_numbers(id).await?;
    Ok(ok(json!({
        "count": numbers.len(),
        "numbers": numbers,
    })))
}
