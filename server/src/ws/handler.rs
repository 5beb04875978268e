use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;
use crate::ws::session::Session;

/// Query parameters for the relay socket. The token travels out-of-band as
/// `?token=JWT` because browsers cannot set headers on WebSocket requests.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /auth/ws?token=JWT
/// Verifies the token before accepting any frame. On failure the connection is
/// upgraded and immediately closed with 1008 (policy violation).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.token.filter(|t| !t.is_empty());

    let verified = match token.as_deref() {
        Some(token) => state.verifier.verify(token).await,
        None => None,
    };

    let mut session = Session::new();
    match session.authenticate(verified).map(str::to_owned) {
        Ok(identity) => {
            tracing::info!(identity = %identity, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, session))
        }
        Err(_) => {
            let reason = if token.is_none() {
                "authorization required"
            } else {
                "invalid token"
            };
            tracing::warn!(
                close_code = close_code::POLICY,
                reason = reason,
                "WebSocket handshake rejected"
            );
            ws.on_upgrade(move |socket| reject(socket, reason))
        }
    }
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let close_frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
