//! REST call initiation. Equivalent to sending a `call` offer over the socket,
//! except that an offline target is a 404 instead of a `call-error` frame.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::protocol::{CallType, RoutedEvent};
use crate::ws::RouteOutcome;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    pub target_user: String,
    pub sdp: String,
}

async fn start_call(
    state: AppState,
    caller: &str,
    payload: Result<Json<StartCallRequest>, JsonRejection>,
    call_type: CallType,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.target_user.is_empty() || req.sdp.is_empty() {
        return Err(ApiError::BadRequest(
            "targetUser and sdp are required".to_string(),
        ));
    }

    if state.registry.lookup(&req.target_user).is_none() {
        return Err(ApiError::NotFound("user is offline or does not exist".to_string()));
    }

    let event = RoutedEvent::call_offer(caller, &req.target_user, call_type, &req.sdp);
    // The HTTP status is the only report; no call-error frame goes to the caller.
    match state.router.deliver(&event) {
        RouteOutcome::Delivered => {
            tracing::info!(
                from = %caller,
                to = %req.target_user,
                call_type = call_type.as_str(),
                "Call offer relayed"
            );
            Ok(Json(json!({ "success": true })))
        }
        RouteOutcome::RecipientOffline => {
            Err(ApiError::NotFound("user is offline or does not exist".to_string()))
        }
        RouteOutcome::InvalidEvent => Err(ApiError::BadRequest("invalid call".to_string())),
    }
}

/// POST /auth/call/voice
pub async fn start_voice_call(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    payload: Result<Json<StartCallRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    start_call(state, &me.username, payload, CallType::Voice).await
}

/// POST /auth/call/video
pub async fn start_video_call(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    payload: Result<Json<StartCallRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    start_call(state, &me.username, payload, CallType::Video).await
}
