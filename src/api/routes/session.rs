//! Session control endpoints.
//!
//! Every mutating endpoint forwards a `SessionCommand` to the service loop,
//! which applies it through the session controller. Handlers never hold the
//! controller lock themselves.

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::session::SessionStatusHandle;

/// Commands the API forwards to the service loop.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    BeginReceive,
    EndReceive,
    BeginRecord,
    EndRecord,
    TogglePlay,
    ToggleMute,
    BeginSend { target: String, label: Option<String> },
    EndSend,
}

/// Request body for POST /send/start.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SendRequest {
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Clone)]
pub struct SessionRouteState {
    pub tx: mpsc::UnboundedSender<SessionCommand>,
    pub status: SessionStatusHandle,
}

pub fn router(state: SessionRouteState) -> Router {
    Router::new()
        .route("/status", get(session_status))
        .route("/receive/start", post(receive_start))
        .route("/receive/stop", post(receive_stop))
        .route("/record/start", post(record_start))
        .route("/record/stop", post(record_stop))
        .route("/play/toggle", post(play_toggle))
        .route("/mute/toggle", post(mute_toggle))
        .route("/send/start", post(send_start))
        .route("/send/stop", post(send_stop))
        .with_state(state)
}

async fn session_status(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    let status = state.status.get().await;
    Ok(Json(json!({
        "display": status.display(),
        "session": status,
    })))
}

async fn dispatch(state: &SessionRouteState, command: SessionCommand) -> ApiResult<Json<Value>> {
    info!("API command: {:?}", command);
    state
        .tx
        .send(command)
        .map_err(|_| ApiError::internal("service loop is not running"))?;

    // Give the service loop a moment so the returned status reflects the
    // command for fast operations.
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    let status = state.status.get().await;
    Ok(Json(json!({
        "success": true,
        "display": status.display(),
        "session": status,
    })))
}

async fn receive_start(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::BeginReceive).await
}

async fn receive_stop(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::EndReceive).await
}

async fn record_start(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::BeginRecord).await
}

async fn record_stop(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::EndRecord).await
}

async fn play_toggle(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::TogglePlay).await
}

async fn mute_toggle(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::ToggleMute).await
}

async fn send_start(
    State(state): State<SessionRouteState>,
    Json(request): Json<SendRequest>,
) -> ApiResult<Json<Value>> {
    if request.target.trim().is_empty() {
        return Err(ApiError::bad_request("target must not be empty"));
    }
    dispatch(
        &state,
        SessionCommand::BeginSend {
            target: request.target,
            label: request.label,
        },
    )
    .await
}

async fn send_stop(State(state): State<SessionRouteState>) -> ApiResult<Json<Value>> {
    dispatch(&state, SessionCommand::EndSend).await
}
