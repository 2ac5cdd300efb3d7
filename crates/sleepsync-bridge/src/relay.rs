//! Relay task: serial link events to WebSocket clients.
//!
//! Subscribes to the link supervisor's event stream and fans device
//! messages out to every connected client. Messages of a replayed kind
//! (`sensor_data`, `device_status`) also update the latest-message cache
//! so joining clients immediately see current state.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sleepsync_link::{DisconnectReason, LinkEvent, SerialFrame};
use sleepsync_types::{BridgeEvent, DeviceMessage, MessageKind};

use crate::state::AppState;

/// Background task relaying link events to clients.
pub struct Relay {
    state: Arc<AppState>,
    events: sleepsync_link::EventReceiver,
}

impl Relay {
    /// Create a new relay.
    ///
    /// Subscribes to link events immediately so nothing published between
    /// construction and [`start`](Self::start) is missed.
    pub fn new(state: Arc<AppState>) -> Self {
        let events = state.link.subscribe();
        Self { state, events }
    }

    /// Start the relay task.
    ///
    /// The task ends when the link supervisor shuts down and drops its
    /// event channel.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(run(self.state, self.events))
    }
}

async fn run(state: Arc<AppState>, mut events: sleepsync_link::EventReceiver) {
    info!("relay started");

    // A connect that landed before we subscribed never shows up as an
    // event; announce it from the status snapshot instead.
    let status = state.link.status();
    if status.state.is_connected() {
        broadcast_event(&state, &BridgeEvent::status(true, status.port, None));
    }

    loop {
        match events.recv().await {
            Ok(event) => handle_event(&state, event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "relay fell behind the link event stream");
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!("relay stopped");
}

async fn handle_event(state: &Arc<AppState>, event: LinkEvent) {
    match event {
        LinkEvent::Connected { port } => {
            info!(port = %port, "device connected, notifying clients");
            broadcast_event(state, &BridgeEvent::status(true, Some(port), None));
        }
        LinkEvent::Disconnected { reason } => {
            let error = match &reason {
                DisconnectReason::Shutdown => None,
                other => Some(other.to_string()),
            };
            broadcast_event(state, &BridgeEvent::status(false, None, error));
        }
        LinkEvent::ReconnectScheduled { attempt, delay_ms } => {
            debug!(attempt, delay_ms, "reconnect scheduled");
        }
        LinkEvent::Frame(SerialFrame::Json(msg)) => relay_message(state, msg).await,
        LinkEvent::Frame(SerialFrame::Text(line)) => {
            // Firmware log output; useful for debugging, not for clients.
            debug!(line = %line, "device");
        }
        _ => {}
    }
}

async fn relay_message(state: &Arc<AppState>, msg: DeviceMessage) {
    let kind = msg.message_kind();
    match kind {
        MessageKind::SensorData => {
            state.latest.write().await.sensor_data = Some(msg.clone());
        }
        MessageKind::DeviceStatus => {
            state.latest.write().await.device_status = Some(msg.clone());
        }
        _ => {}
    }

    let clients = state.broadcast(msg.as_value().to_string());
    debug!(kind = ?kind, clients, "relayed device message");
}

fn broadcast_event(state: &Arc<AppState>, event: &BridgeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            state.broadcast(json);
        }
        Err(e) => warn!("failed to serialize bridge event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    use sleepsync_link::supervisor::QueueConnector;
    use sleepsync_link::{LinkConfig, LinkSupervisor, ReconnectOptions};

    use crate::config::Config;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> LinkConfig {
        LinkConfig {
            reconnect: ReconnectOptions::new().initial_delay(Duration::from_millis(10)),
            ..LinkConfig::default()
        }
    }

    async fn next_json(
        rx: &mut tokio::sync::broadcast::Receiver<String>,
    ) -> serde_json::Value {
        let text = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_relays_frames_and_status() {
        let (client, mut server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let state = AppState::new(handle, Config::default());
        let mut rx = state.clients_tx.subscribe();

        Relay::new(Arc::clone(&state)).start();

        // Connection announcement first.
        let status = next_json(&mut rx).await;
        assert_eq!(status["type"], "bridge_status");
        assert_eq!(status["connected"], true);
        assert_eq!(status["esp32_connected"], true);

        server
            .write_all(b"{\"type\":\"sensor_data\",\"data\":{\"light_level\":2048}}\n")
            .await
            .unwrap();

        let relayed = next_json(&mut rx).await;
        assert_eq!(relayed["type"], "sensor_data");
        assert_eq!(relayed["data"]["light_level"], 2048);

        // Cache updated for late joiners.
        timeout(WAIT, async {
            loop {
                if state.latest.read().await.sensor_data.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        state.link.shutdown();
    }

    #[tokio::test]
    async fn test_announces_link_already_connected_at_start() {
        let (client, _server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));

        // Let the link come up before the relay exists.
        let mut events = handle.subscribe();
        timeout(WAIT, async {
            loop {
                if let Ok(LinkEvent::Connected { .. }) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let state = AppState::new(handle, Config::default());
        let mut rx = state.clients_tx.subscribe();
        Relay::new(Arc::clone(&state)).start();

        let status = next_json(&mut rx).await;
        assert_eq!(status["type"], "bridge_status");
        assert_eq!(status["connected"], true);

        state.link.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_produces_status_with_error() {
        let (client, server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let state = AppState::new(handle, Config::default());
        let mut rx = state.clients_tx.subscribe();

        Relay::new(Arc::clone(&state)).start();

        // Consume the connect announcement, then unplug.
        let _ = next_json(&mut rx).await;
        drop(server);

        let status = next_json(&mut rx).await;
        assert_eq!(status["type"], "bridge_status");
        assert_eq!(status["connected"], false);
        assert!(status["error"].is_string());

        state.link.shutdown();
    }

    #[tokio::test]
    async fn test_text_frames_are_not_relayed() {
        let (client, mut server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let state = AppState::new(handle, Config::default());
        let mut rx = state.clients_tx.subscribe();

        Relay::new(Arc::clone(&state)).start();
        let _ = next_json(&mut rx).await;

        server
            .write_all(b"I (100) BOOT: starting\n{\"type\":\"device_ready\"}\n")
            .await
            .unwrap();

        // The log line is swallowed; the next client payload is the JSON.
        let relayed = next_json(&mut rx).await;
        assert_eq!(relayed["type"], "device_ready");

        state.link.shutdown();
    }
}
