//! Account and directory endpoints under `/auth`.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use crate::auth::{jwt, AuthUser, AUTH_COOKIE};
use crate::db::{self, models::UserProfile};
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store;

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub token: String,
}

fn validate_credentials(req: &CredentialsRequest) -> Result<(), ApiError> {
    if req.username.trim().chars().count() < MIN_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be at least {MIN_USERNAME_LEN} characters"
        )));
    }
    if req.username.trim() != req.username {
        return Err(ApiError::BadRequest(
            "username cannot start or end with whitespace".to_string(),
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .path("/")
        .build()
}

fn issue(state: &AppState, jar: CookieJar, user: UserProfile) -> Result<(CookieJar, AuthResponse), ApiError> {
    let token = jwt::issue_token(state.verifier.secret(), &user.id, state.token_ttl_secs)?;
    let jar = jar.add(session_cookie(token.clone(), state.cookie_secure));
    Ok((jar, AuthResponse { user, token }))
}

/// POST /auth/register
/// Create an account and log it in straight away.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_credentials(&req)?;

    let user = store::register(&state.db, &req.username, &req.password).await?;

    let (jar, body) = issue(&state, jar, user)?;
    Ok((StatusCode::CREATED, jar, Json(body)))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let user = store::authenticate(&state.db, &req.username, &req.password).await?;

    let Some(user) = user else {
        tracing::info!(username = %req.username, "Login failed");
        return Err(ApiError::InvalidCredentials);
    };

    let (jar, body) = issue(&state, jar, user)?;
    Ok((jar, Json(body)))
}

/// GET /auth/me
pub async fn me(AuthUser(user): AuthUser) -> Json<UserProfile> {
    Json(user)
}

/// GET /auth/logout
/// Tokens are stateless; logging out just drops the cookie.
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let jar = jar.remove(Cookie::build(AUTH_COOKIE).path("/"));
    (jar, Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub user: UserProfile,
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<DirectoryEntry>,
    pub total: u64,
}

/// GET /auth/users?page=&limit=&search=
/// Everyone except the caller, with a presence flag from the registry.
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let search = query.search.unwrap_or_default();

    let result = db::with_conn(&state.db, move |conn| {
        store::list_users(conn, &me.id, page, limit, search.trim())
    })
    .await?;

    let users = result
        .users
        .into_iter()
        .map(|user| DirectoryEntry {
            online: state.registry.is_online(&user.username),
            user,
        })
        .collect();

    Ok(Json(ListUsersResponse {
        users,
        total: result.total,
    }))
}
