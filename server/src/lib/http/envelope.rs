// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use palaver_data::page::{Paged, Pagination};
use palaver_node::error::CoreError;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// The uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// `200 {success: true, data}`.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: None,
        data: Some(data),
        pagination: None,
    })
}

/// `200 {success: true, data, pagination}`.
pub fn ok_paged<T: Serialize>(paged: Paged<T>) -> Json<ApiResponse<Vec<T>>> {
    Json(ApiResponse {
        success: true,
        message: None,
        data: Some(paged.items),
        pagination: Some(paged.pagination),
    })
}

/// `200 {success: true, message}` without data.
pub fn ok_message(message: impl Into<String>) -> Json<ApiResponse<()>> {
    Json(ApiResponse {
        success: true,
        message: Some(message.into()),
        data: None,
        pagination: None,
    })
}

/// Transport-level error: a core failure plus the auth rejections that
/// never reach a core.
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Unauthorized(&'static str),
    Forbidden(&'static str),
}

impl ApiError {
    pub fn unauthorized(msg: &'static str) -> Self {
        Self::Unauthorized(msg)
    }

    pub fn forbidden(msg: &'static str) -> Self {
        Self::Forbidden(msg)
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, data) = match self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, msg.to_owned(), None)
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, msg.to_owned(), None)
            }
            ApiError::Core(core) => {
                let status = match &core {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Conflict(_) => StatusCode::CONFLICT,
                    CoreError::ForbiddenState(_) => StatusCode::BAD_REQUEST,
                    CoreError::Upstream(_) => StatusCode::BAD_GATEWAY,
                    CoreError::Integrity(_) | CoreError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    error!(event = "request failed", %core);
                }
                let data = match &core {
                    CoreError::Forbidden { code, .. } => {
                        Some(json!({ "code": code }))
                    }
                    _ => None,
                };
                (status, core.to_string(), data)
            }
        };

        let body = Json(ApiResponse {
            success: false,
            message: Some(message),
            data,
            pagination: None,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use palaver_data::conversation::SendBlockReason;

    use super::*;

    #[test]
    fn envelope_omits_empty_fields() {
        let json =
            serde_json::to_value(&ApiResponse {
                success: true,
                message: None,
                data: Some(5),
                pagination: None,
            })
            .unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 5 }));
    }

    #[tokio::test]
    async fn gate_rejections_carry_the_machine_code() {
        let err = ApiError::from(CoreError::gate(
            SendBlockReason::MessageLimitReached,
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["code"], "MESSAGE_LIMIT_REACHED");
    }
}
