use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::AUTH_COOKIE;
use crate::db::models::UserProfile;
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated caller, resolved from `Authorization: Bearer <token>` or the
/// `auth` cookie (the header wins when both are present).
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserProfile);

/// Pull the session token out of request headers.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        CookieJar::from_headers(&parts.headers)
            .get(AUTH_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|t| !t.is_empty())
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or(ApiError::Unauthorized)?;
        state
            .verifier
            .resolve(&token)
            .await
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}
