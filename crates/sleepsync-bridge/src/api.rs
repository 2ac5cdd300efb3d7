//! REST API endpoints for the bridge.
//!
//! A small surface next to the WebSocket relay:
//!
//! - `GET /health` - liveness plus connection and client counts
//! - `GET /status` - link state and the cached latest messages
//! - `GET /ports` - serial port enumeration
//! - `POST /command` - send a command to the device (also mounted at
//!   `/api/esp32` for older clients)

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use sleepsync_link::{DiscoveredPort, LinkState};
use sleepsync_types::Command;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/ports", get(list_ports))
        .route("/command", post(send_command))
        // Kept for clients written against the old bridge.
        .route("/api/esp32", post(send_command))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub esp32_connected: bool,
    pub websocket_clients: usize,
    pub uptime_secs: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        esp32_connected: state.link.is_connected(),
        websocket_clients: state.client_count(),
        uptime_secs: state.uptime_secs(),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Bridge status response. Connection fields sit under `bridge`; clients
/// read `body.bridge.connected`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub bridge: BridgeBlock,
    pub last_sensor_data: Option<Value>,
    pub last_device_status: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Connection summary inside the status response.
#[derive(Debug, Serialize)]
pub struct BridgeBlock {
    pub connected: bool,
    pub state: LinkState,
    pub port: Option<String>,
    pub clients: usize,
}

/// Status endpoint: link state and cached latest messages.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let link = state.link.status();
    let latest = state.latest.read().await;
    Json(StatusResponse {
        bridge: BridgeBlock {
            connected: link.state.is_connected(),
            state: link.state,
            port: link.port,
            clients: state.client_count(),
        },
        last_sensor_data: latest.sensor_data.as_ref().map(|m| m.as_value().clone()),
        last_device_status: latest.device_status.as_ref().map(|m| m.as_value().clone()),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Port listing response.
#[derive(Debug, Serialize)]
pub struct PortsResponse {
    pub ports: Vec<DiscoveredPort>,
    pub count: usize,
}

/// List serial ports with USB metadata.
async fn list_ports() -> Result<Json<PortsResponse>, AppError> {
    let ports = sleepsync_link::list_ports()
        .map_err(|e| AppError::Internal(format!("failed to enumerate ports: {}", e)))?;
    let count = ports.len();
    Ok(Json(PortsResponse { ports, count }))
}

/// Command acceptance response.
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub success: bool,
    pub command: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Send a command to the device.
///
/// Accepts the same loose shapes as the WebSocket path (`command` or
/// `type` for the name, `data` or `payload` for the payload). Returns
/// 503 while the device is disconnected; nothing is queued.
async fn send_command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<CommandAccepted>, AppError> {
    let command =
        Command::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let name = command.command.clone();

    state.link.send(command).await.map_err(|e| match e {
        sleepsync_link::Error::NotConnected => {
            AppError::Unavailable("device not connected".to_string())
        }
        other => AppError::Internal(other.to_string()),
    })?;

    Ok(Json(CommandAccepted {
        success: true,
        command: name,
        timestamp: OffsetDateTime::now_utc(),
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
