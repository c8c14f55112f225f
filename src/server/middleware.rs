/// Request extractors.
///
/// `AuthUser` validates the bearer token from the Authorization header and
/// exposes the authenticated user ID to route handlers. `ApiJson` is
/// `axum::Json` with body errors reported in the API's error envelope.
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::auth::Claims;
use super::AppState;
use crate::error::MediError;

/// Authenticated user extracted from JWT.
///
/// Use this as an extractor in route handlers to require authentication:
/// ```ignore
/// async fn handler(user: AuthUser) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = MediError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| MediError::Unauthorized("Missing Authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| MediError::Unauthorized("Invalid Authorization format".into()))?;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| MediError::Unauthorized(format!("Invalid token: {e}")))?;

        let user_id = Uuid::parse_str(&token_data.claims.sub)
            .map_err(|_| MediError::Unauthorized("Invalid user ID in token".into()))?;

        Ok(AuthUser { user_id })
    }
}

/// JSON body whose rejections render as `InvalidInput`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = MediError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| MediError::InvalidInput(e.body_text()))?;
        Ok(ApiJson(value))
    }
}
