// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use palaver_data::challenge::ChallengeStatus;
use palaver_data::page::{PageRequest, MESSAGE_PAGE_LIMIT};
use palaver_node::challenge::{
    ChallengePatch, EntrepreneurPatch, NewChallenge, NewEntrepreneur,
};
use palaver_node::clients::payments::STATUS_SUCCEEDED;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::{AdminUser, AuthUser, MaybeAuthUser, ServiceAuth};
use super::envelope::{ok, ok_message, ok_paged, ApiResult};
use crate::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/current", get(current))
        .route("/{id}", get(get_one))
        .route("/{id}/entrepreneurs", get(entrepreneurs))
        .route("/{id}/leaderboard", get(leaderboard))
        .route("/{id}/vote", post(vote))
        .route("/{id}/support", post(support))
        .route("/{id}/ticket-allowance", get(ticket_allowance))
        .route(
            "/webhooks/payment-confirmation",
            post(payment_confirmation),
        )
        .route("/admin", get(admin_list).post(admin_create))
        .route(
            "/admin/{id}",
            get(admin_get).patch(admin_update).delete(admin_delete),
        )
        .route("/admin/{id}/status", patch(admin_set_status))
        .route("/admin/{id}/entrepreneurs", post(admin_add_entrepreneur))
        .route(
            "/admin/entrepreneurs/{id}",
            patch(admin_update_entrepreneur).delete(admin_delete_entrepreneur),
        )
        .route(
            "/admin/entrepreneurs/{id}/approve",
            post(admin_approve_entrepreneur),
        )
        .route("/admin/{id}/close-voting", post(admin_close_voting))
        .route("/admin/{id}/distribute-funds", post(admin_distribute_funds))
        .route("/admin/{id}/fund-summary", get(admin_fund_summary))
        .route("/admin/{id}/analytics", get(admin_analytics))
        .route("/admin/{id}/votes", get(admin_votes))
}

async fn current(
    State(state): State<SharedState>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.current().await?))
}

async fn get_one(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.get(id).await?))
}

async fn entrepreneurs(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.entrepreneurs(id, false).await?))
}

async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.leaderboard(id).await?))
}

#[derive(Debug, Deserialize)]
struct VoteBody {
    entrepreneur_id: Uuid,
    amount: u64,
}

async fn vote(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<VoteBody>,
) -> ApiResult<impl IntoResponse> {
    let checkout = state
        .votes
        .initiate_vote(&user.id, id, body.entrepreneur_id, body.amount)
        .await?;
    Ok(ok(checkout))
}

async fn support(
    State(state): State<SharedState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<VoteBody>,
) -> ApiResult<impl IntoResponse> {
    let checkout = state
        .votes
        .initiate_support(
            user.as_ref().map(|u| u.id.as_str()),
            id,
            body.entrepreneur_id,
            body.amount,
        )
        .await?;
    Ok(ok(checkout))
}

async fn ticket_allowance(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.votes.ticket_allowance(&user.id, id).await?))
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    session_id: String,
    status: String,
}

/// Gateway confirmation for votes and support payments. Idempotent on
/// the session id: redeliveries acknowledge without side effects.
async fn payment_confirmation(
    State(state): State<SharedState>,
    _service: ServiceAuth,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<impl IntoResponse> {
    if payload.status != STATUS_SUCCEEDED
        && payload.status != palaver_node::clients::payments::STATUS_FAILED
    {
        return Ok(ok_message(format!(
            "ignored payment status {}",
            payload.status
        ))
        .into_response());
    }
    let outcome = state
        .votes
        .confirm_payment(&payload.session_id, &payload.status)
        .await?;
    Ok(ok(outcome.vote().clone()).into_response())
}

async fn admin_list(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.list().await?))
}

async fn admin_create(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Json(body): Json<NewChallenge>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.create(body).await?))
}

async fn admin_get(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.get(id).await?))
}

async fn admin_update(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ChallengePatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.update(id, body).await?))
}

async fn admin_delete(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.challenges.delete(id).await?;
    Ok(ok(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct SetStatus {
    status: ChallengeStatus,
}

async fn admin_set_status(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatus>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.set_status(id, body.status).await?))
}

async fn admin_add_entrepreneur(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<NewEntrepreneur>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.add_entrepreneur(id, body).await?))
}

async fn admin_update_entrepreneur(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<EntrepreneurPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.update_entrepreneur(id, body).await?))
}

async fn admin_delete_entrepreneur(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.challenges.delete_entrepreneur(id).await?;
    Ok(ok(json!({ "deleted": true })))
}

async fn admin_approve_entrepreneur(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.approve_entrepreneur(id).await?))
}

async fn admin_close_voting(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.close_voting(id).await?))
}

async fn admin_distribute_funds(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.distribute_funds(id).await?))
}

async fn admin_fund_summary(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.fund_summary(id).await?))
}

async fn admin_analytics(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(state.challenges.analytics(id).await?))
}

async fn admin_votes(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (page, limit) = page.normalize(MESSAGE_PAGE_LIMIT);
    let paged = state.challenges.votes(id, page, limit).await?;
    Ok(ok_paged(paged))
}
