// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use palaver_data::directory::Role;
use palaver_data::UserId;
use serde::{Deserialize, Serialize};

use super::envelope::ApiError;
use crate::SharedState;

/// Header a collaborator identifies itself with on service calls.
pub const SERVICE_NAME_HEADER: &str = "x-service-name";

/// Claims carried by a user bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub name: String,
    pub exp: u64,
}

/// Verification material for user tokens plus the shared secret that
/// authenticates collaborator webhooks.
pub struct AuthKeys {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
    service_secret: String,
}

impl AuthKeys {
    pub fn new(jwt_secret: &str, service_secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
            encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            service_secret: service_secret.to_owned(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::unauthorized("invalid or expired token"))
    }

    /// Issues a token; the login service owns this in production, the
    /// server only signs tokens in tests and tooling.
    pub fn issue(&self, claims: &Claims) -> String {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            claims,
            &self.encoding,
        )
        .expect("HS256 signing cannot fail")
    }

    fn verify_service(&self, bearer: &str) -> bool {
        !self.service_secret.is_empty() && bearer == self.service_secret
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// An authenticated end user.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: UserId,
    pub role: Role,
    pub name: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            name: claims.name,
        }
    }
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let claims = state.auth.verify(token)?;
        Ok(claims.into())
    }
}

/// An authenticated user whose token carries the admin role.
#[derive(Clone, Debug)]
pub struct AdminUser(pub AuthUser);

impl FromRequestParts<SharedState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(ApiError::forbidden("admin role required"));
        }
        Ok(AdminUser(user))
    }
}

/// Optional authentication for endpoints open to anonymous callers.
#[derive(Clone, Debug)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequestParts<SharedState> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => {
                let claims = state.auth.verify(token)?;
                Ok(MaybeAuthUser(Some(claims.into())))
            }
        }
    }
}

/// A collaborator presenting the shared secret and naming itself.
#[derive(Clone, Debug)]
pub struct ServiceAuth {
    pub service_name: String,
}

impl FromRequestParts<SharedState> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        if !state.auth.verify_service(token) {
            return Err(ApiError::unauthorized("invalid service secret"));
        }
        let service_name = parts
            .headers
            .get(SERVICE_NAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::unauthorized("missing x-service-name header")
            })?;
        Ok(ServiceAuth {
            service_name: service_name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> AuthKeys {
        AuthKeys::new("jwt-secret", "svc-secret")
    }

    fn claims(role: Role) -> Claims {
        Claims {
            sub: "user-1".into(),
            role,
            name: "Awa".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        }
    }

    #[test]
    fn tokens_round_trip() {
        let keys = keys();
        let token = keys.issue(&claims(Role::Admin));
        let verified = keys.verify(&token).unwrap();
        assert_eq!(verified.sub, "user-1");
        assert_eq!(verified.role, Role::Admin);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let keys = keys();
        let mut c = claims(Role::User);
        c.exp = 1_000;
        let token = keys.issue(&c);
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let keys = keys();
        let other = AuthKeys::new("different-secret", "svc-secret");
        let token = other.issue(&claims(Role::User));
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn service_secret_must_match_exactly() {
        let keys = keys();
        assert!(keys.verify_service("svc-secret"));
        assert!(!keys.verify_service("svc-secret2"));
        assert!(!AuthKeys::new("a", "").verify_service(""));
    }
}
