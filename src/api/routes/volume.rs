//! Output volume endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::volume::VolumeControl;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct VolumeRequest {
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default)]
    pub muted: Option<bool>,
}

#[derive(Clone)]
pub struct VolumeRouteState {
    pub volume: Arc<dyn VolumeControl>,
}

pub fn router(state: VolumeRouteState) -> Router {
    Router::new()
        .route("/", get(get_volume).put(put_volume))
        .with_state(state)
}

async fn get_volume(State(state): State<VolumeRouteState>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "level": state.volume.level().await?,
        "muted": state.volume.muted().await?,
        "device": state.volume.device_id().await?,
    })))
}

async fn put_volume(
    State(state): State<VolumeRouteState>,
    Json(request): Json<VolumeRequest>,
) -> ApiResult<Json<Value>> {
    if request.level.is_none() && request.muted.is_none() {
        return Err(ApiError::bad_request("provide level and/or muted"));
    }
    if let Some(level) = request.level {
        if level > 100 {
            return Err(ApiError::bad_request("level must be 0..=100"));
        }
        state.volume.set_level(level).await?;
    }
    if let Some(muted) = request.muted {
        state.volume.set_muted(muted).await?;
    }
    get_volume(State(state)).await
}
