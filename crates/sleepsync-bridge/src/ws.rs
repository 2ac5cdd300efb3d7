//! WebSocket handler for device relay and client commands.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sleepsync_types::{BridgeEvent, Command};

use crate::state::AppState;

/// Create the WebSocket router, mounted on the HTTP listener at `/ws`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// Router for the dedicated WebSocket listener, serving upgrades at `/`.
pub fn standalone_router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before sending the snapshot so no message published in
    // between is missed.
    let mut rx = state.clients_tx.subscribe();

    let count = state.client_connected();
    info!(clients = count, "WebSocket client connected");

    for payload in snapshot_payloads(&state).await {
        if sender.send(Message::Text(payload.into())).await.is_err() {
            info!("WebSocket client disconnected during initial snapshot");
            state.client_disconnected();
            return;
        }
    }

    debug!("sent initial snapshot to WebSocket client");

    // Command acks go back to this client only, not through the broadcast.
    let (ack_tx, mut ack_rx) = mpsc::channel::<String>(16);

    // Send task: relay broadcasts and acks to the client.
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "WebSocket client fell behind, dropping messages");
                    }
                    Err(RecvError::Closed) => break,
                },
                ack = ack_rx.recv() => match ack {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Receive task: forward client commands to the device.
    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let Some(ack) = handle_client_command(&recv_state, &text).await else {
                        continue;
                    };
                    let json = match serde_json::to_string(&ack) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("failed to serialize command ack: {}", e);
                            continue;
                        }
                    };
                    if ack_tx.send(json).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {
                    // Pings are answered by axum; binary is ignored.
                }
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    let remaining = state.client_disconnected();
    info!(clients = remaining, "WebSocket client disconnected");
}

/// Messages replayed to a client when it joins: current bridge status,
/// then the cached latest sensor data and device status.
async fn snapshot_payloads(state: &Arc<AppState>) -> Vec<String> {
    let mut payloads = Vec::with_capacity(3);

    let status = state.link.status();
    let event = BridgeEvent::status(status.state.is_connected(), status.port.clone(), None);
    match serde_json::to_string(&event) {
        Ok(json) => payloads.push(json),
        Err(e) => warn!("failed to serialize bridge status: {}", e),
    }

    let latest = state.latest.read().await;
    if let Some(msg) = &latest.sensor_data {
        payloads.push(msg.as_value().to_string());
    }
    if let Some(msg) = &latest.device_status {
        payloads.push(msg.as_value().to_string());
    }

    payloads
}

/// Parse a client message as a command, forward it to the device, and
/// build the ack. Malformed messages are logged and dropped with no
/// reply; a well-formed command that cannot be sent gets a
/// `success: false` response. Neither closes the socket.
pub(crate) async fn handle_client_command(
    state: &Arc<AppState>,
    text: &str,
) -> Option<BridgeEvent> {
    let command = match Command::from_json(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "dropped malformed client message");
            return None;
        }
    };

    let name = command.command.clone();
    match state.link.send(command).await {
        Ok(()) => {
            info!(command = %name, "forwarded client command to device");
            Some(BridgeEvent::command_response(true, name))
        }
        Err(e) => {
            warn!(command = %name, error = %e, "failed to forward command");
            Some(BridgeEvent::command_response(false, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    use sleepsync_link::supervisor::QueueConnector;
    use sleepsync_link::{LinkConfig, LinkSupervisor, ReconnectOptions};
    use sleepsync_types::DeviceMessage;

    use crate::config::Config;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> LinkConfig {
        LinkConfig {
            reconnect: ReconnectOptions::new().initial_delay(Duration::from_millis(10)),
            ..LinkConfig::default()
        }
    }

    fn disconnected_state() -> Arc<AppState> {
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![]));
        AppState::new(handle, Config::default())
    }

    async fn connected_state() -> (Arc<AppState>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let mut events = handle.subscribe();
        timeout(WAIT, async {
            loop {
                if let Ok(sleepsync_link::LinkEvent::Connected { .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .unwrap();
        (AppState::new(handle, Config::default()), server)
    }

    #[tokio::test]
    async fn test_snapshot_starts_with_bridge_status() {
        let state = disconnected_state();
        let payloads = snapshot_payloads(&state).await;
        assert_eq!(payloads.len(), 1);

        let status: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(status["type"], "bridge_status");
        assert_eq!(status["connected"], false);
    }

    #[tokio::test]
    async fn test_snapshot_replays_cached_messages() {
        let state = disconnected_state();
        {
            let mut latest = state.latest.write().await;
            latest.sensor_data = Some(
                DeviceMessage::from_json(r#"{"type":"sensor_data","data":{"light_level":7}}"#)
                    .unwrap(),
            );
            latest.device_status = Some(
                DeviceMessage::from_json(r#"{"type":"device_status","status":{"alarm_enabled":true}}"#)
                    .unwrap(),
            );
        }

        let payloads = snapshot_payloads(&state).await;
        assert_eq!(payloads.len(), 3);
        assert!(payloads[1].contains("sensor_data"));
        assert!(payloads[2].contains("device_status"));
    }

    #[tokio::test]
    async fn test_client_command_reaches_device() {
        let (state, mut server) = connected_state().await;

        let ack =
            handle_client_command(&state, r#"{"command":"set_rgb","data":{"r":255,"g":0,"b":0}}"#)
                .await;
        match ack {
            Some(BridgeEvent::CommandResponse { success, command, .. }) => {
                assert!(success);
                assert_eq!(command, "set_rgb");
            }
            other => panic!("unexpected ack: {:?}", other),
        }

        let mut buf = vec![0u8; 256];
        let n = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
        let written = String::from_utf8_lossy(&buf[..n]);
        assert!(written.contains("\"command\":\"set_rgb\""));

        state.link.shutdown();
    }

    #[tokio::test]
    async fn test_client_command_accepts_type_alias() {
        let (state, mut server) = connected_state().await;

        let ack = handle_client_command(&state, r#"{"type":"get_status"}"#).await;
        assert!(matches!(
            ack,
            Some(BridgeEvent::CommandResponse { success: true, .. })
        ));

        let mut buf = vec![0u8; 256];
        let n = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
        // Normalized to the `command` key the firmware requires.
        assert_eq!(
            String::from_utf8_lossy(&buf[..n]),
            "{\"command\":\"get_status\"}\n"
        );

        state.link.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped_without_ack() {
        let state = disconnected_state();

        assert!(handle_client_command(&state, "not json at all").await.is_none());
        assert!(handle_client_command(&state, r#"{"data":{"r":1}}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_command_while_disconnected_gets_failure_ack() {
        let state = disconnected_state();

        let ack = handle_client_command(&state, r#"{"command":"get_status"}"#).await;
        match ack {
            Some(BridgeEvent::CommandResponse { success, command, .. }) => {
                assert!(!success);
                assert_eq!(command, "get_status");
            }
            other => panic!("unexpected ack: {:?}", other),
        }
    }
}
