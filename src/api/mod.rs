//! REST API server for Streamcast.
//!
//! Provides HTTP endpoints for:
//! - Session control (receive, record, play, mute, send)
//! - Output volume
//! - Send-target history

pub mod error;
pub mod routes;

use std::sync::Arc;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceBuilder;
use tracing::info;

use crate::history::EndpointHistory;
use crate::session::SessionStatusHandle;
use crate::volume::VolumeControl;

pub use routes::session::{SendRequest, SessionCommand};

pub struct ApiServer {
    port: u16,
    session_state: routes::session::SessionRouteState,
    volume_state: routes::volume::VolumeRouteState,
    history_state: routes::history::HistoryRouteState,
}

impl ApiServer {
    pub fn new(
        port: u16,
        tx: mpsc::UnboundedSender<SessionCommand>,
        status: SessionStatusHandle,
        volume: Arc<dyn VolumeControl>,
        history: Arc<Mutex<EndpointHistory>>,
    ) -> Self {
        Self {
            port,
            session_state: routes::session::SessionRouteState { tx, status },
            volume_state: routes::volume::VolumeRouteState { volume },
            history_state: routes::history::HistoryRouteState { history },
        }
    }

    pub async fn start(self) -> Result<()> {
        let app = Router::new()
            .route("/", get(service_info))
            .route("/version", get(version))
            .merge(routes::session::router(self.session_state))
            .nest("/volume", routes::volume::router(self.volume_state))
            .nest("/history", routes::history::router(self.history_state))
            .layer(ServiceBuilder::new());

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /version       - Version info");
        info!("  GET  /status        - Session status");
        info!("  POST /receive/start - Start receiving the stream");
        info!("  POST /receive/stop  - Stop receiving");
        info!("  POST /record/start  - Start recording");
        info!("  POST /record/stop   - Stop recording");
        info!("  POST /play/toggle   - Toggle playback of the recording");
        info!("  POST /mute/toggle   - Toggle output mute");
        info!("  POST /send/start    - Start sending to a target");
        info!("  POST /send/stop     - Stop sending");
        info!("  GET  /volume        - Output volume and device");
        info!("  PUT  /volume        - Set level and/or mute");
        info!("  GET  /history       - Recent send targets");

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "streamcast",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
