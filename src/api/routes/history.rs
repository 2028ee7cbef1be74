//! Send-target history endpoints.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::api::error::ApiResult;
use crate::history::EndpointHistory;

#[derive(Clone)]
pub struct HistoryRouteState {
    pub history: Arc<Mutex<EndpointHistory>>,
}

pub fn router(state: HistoryRouteState) -> Router {
    Router::new()
        .route("/", get(list_history))
        .with_state(state)
}

async fn list_history(State(state): State<HistoryRouteState>) -> ApiResult<Json<Value>> {
    let history = state.history.lock().await;
    Ok(Json(json!({
        "endpoints": history.entries(),
    })))
}
