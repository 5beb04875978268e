//! Chat history and REST message sending.
//!
//! Sending over REST persists first, then pushes the stored message through
//! the relay router so both parties' open sockets see it.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::db::{self, models::PersistedMessage};
use crate::error::ApiError;
use crate::messages::store;
use crate::state::AppState;
use crate::users::store as user_store;
use crate::ws::protocol::RoutedEvent;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<PersistedMessage>,
}

/// GET /auth/messages?to=<username>
/// Conversation between the caller and `to`, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let to = query
        .to
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("recipient not specified".to_string()))?;

    let messages = db::with_conn(&state.db, move |conn| {
        let Some(other) = user_store::find_by_username(conn, &to)? else {
            return Ok(None);
        };
        store::list_messages(conn, &me.id, &other.id).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("recipient not found".to_string()))?;

    Ok(Json(HistoryResponse { messages }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: PersistedMessage,
}

/// POST /auth/message
/// Persist a message, then relay it to whichever participants are online.
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SendMessageResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.text.is_empty() {
        return Err(ApiError::BadRequest("message text is empty".to_string()));
    }

    let sender_id = me.id.clone();
    let persisted = db::with_conn(&state.db, move |conn| {
        let Some(receiver) = user_store::find_by_username(conn, &req.to)? else {
            return Ok(None);
        };
        store::create_message(conn, &sender_id, &receiver.id, &req.text).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("recipient not found".to_string()))?;

    let event = RoutedEvent::message(
        &me.username,
        &persisted.to,
        &persisted.text,
        Some(persisted.created_at),
    );
    let outcome = state.router.dispatch(&event, None);
    tracing::debug!(
        from = %me.username,
        to = %persisted.to,
        outcome = ?outcome,
        "Persisted message relayed"
    );

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message: persisted,
        }),
    ))
}
