//! Connection lifecycle supervisor.
//!
//! [`LinkSupervisor::spawn`] starts a background task that owns the serial
//! connection end to end: discover the port, connect, pump frames into the
//! event channel, and on any failure tear down and retry per the
//! [`ReconnectOptions`]. Callers hold a [`LinkHandle`], which is cheap to
//! clone and safe to use from any task.
//!
//! Connecting is abstracted behind the [`Connector`] trait so tests drive
//! the full lifecycle with in-memory duplex transports.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sleepsync_types::Command;

use crate::error::{Error, Result};
use crate::events::{event_channel, DisconnectReason, EventReceiver, EventSender, LinkEvent};
use crate::link::{open_serial_stream, FrameWriter, Link, DEFAULT_BAUD};
use crate::reconnect::{LinkState, ReconnectOptions};
use crate::scan::{find_device_port, FindOptions};

/// Configuration for the link supervisor.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Explicit serial port path; auto-detect when `None`.
    pub port: Option<String>,
    /// Serial baud rate.
    pub baud: u32,
    /// Fall back to the first enumerated port when detection finds no match.
    pub fallback_to_first_port: bool,
    /// Reconnection policy.
    pub reconnect: ReconnectOptions,
    /// Event broadcast capacity.
    pub event_capacity: usize,
    /// Outbound command queue capacity.
    pub command_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
            fallback_to_first_port: true,
            reconnect: ReconnectOptions::default(),
            event_capacity: crate::events::DEFAULT_EVENT_CAPACITY,
            command_capacity: 32,
        }
    }
}

/// A byte transport the supervisor can drive.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Produces connected transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection, returning the transport and a human-readable
    /// port name for status reporting.
    async fn connect(&self) -> Result<(Box<dyn Transport>, String)>;
}

/// The production connector: port discovery plus serial open.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: Option<String>,
    baud: u32,
    fallback_to_first: bool,
}

impl SerialConnector {
    /// Build a connector from the link configuration.
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud: config.baud,
            fallback_to_first: config.fallback_to_first_port,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, String)> {
        let mut options = FindOptions::new().fallback_to_first(self.fallback_to_first);
        if let Some(port) = &self.port {
            options = options.port(port.clone());
        }
        let discovered = find_device_port(&options)?;
        let stream = open_serial_stream(&discovered.path, self.baud).await?;
        Ok((Box::new(stream) as Box<dyn Transport>, discovered.path))
    }
}

/// Current link status, published through a watch channel.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    /// Connection state.
    pub state: LinkState,
    /// Port in use (or last used).
    pub port: Option<String>,
}

impl LinkStatus {
    fn disconnected() -> Self {
        Self {
            state: LinkState::Disconnected,
            port: None,
        }
    }
}

struct CommandRequest {
    command: Command,
    reply: oneshot::Sender<bool>,
}

/// Handle to a running link supervisor.
#[derive(Clone)]
pub struct LinkHandle {
    events: EventSender,
    status_rx: watch::Receiver<LinkStatus>,
    cmd_tx: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
}

impl LinkHandle {
    /// Subscribe to link events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Current status snapshot.
    pub fn status(&self) -> LinkStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status changes.
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Whether the link is currently connected.
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().state.is_connected()
    }

    /// Send a command to the device.
    ///
    /// Fails immediately with [`Error::NotConnected`] while the link is
    /// down; commands are never queued across a disconnect.
    pub async fn send(&self, command: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        match reply_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::NotConnected),
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Stop the supervisor and close the connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Spawns and runs the connection lifecycle.
pub struct LinkSupervisor;

impl LinkSupervisor {
    /// Spawn a supervisor over real serial hardware.
    pub fn spawn(config: LinkConfig) -> LinkHandle {
        let connector = SerialConnector::from_config(&config);
        Self::spawn_with_connector(config, connector)
    }

    /// Spawn a supervisor with a custom connector. Used by tests.
    pub fn spawn_with_connector<C>(config: LinkConfig, connector: C) -> LinkHandle
    where
        C: Connector + 'static,
    {
        let (events, _) = event_channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(LinkStatus::disconnected());
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let cancel = CancellationToken::new();

        let handle = LinkHandle {
            events: events.clone(),
            status_rx,
            cmd_tx,
            cancel: cancel.clone(),
        };

        tokio::spawn(run(connector, config, events, status_tx, cmd_rx, cancel));

        handle
    }
}

async fn run<C: Connector>(
    connector: C,
    config: LinkConfig,
    events: EventSender,
    status_tx: watch::Sender<LinkStatus>,
    mut cmd_rx: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
) {
    let mut failed_attempts: u32 = 0;
    let mut first_attempt = true;

    loop {
        let state = if first_attempt {
            LinkState::Connecting
        } else {
            LinkState::Reconnecting
        };
        status_tx.send_modify(|s| s.state = state);
        first_attempt = false;

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect() => result,
        };

        match connected {
            Ok((transport, port)) => {
                failed_attempts = 0;
                info!(port = %port, "connected to device");
                let _ = status_tx.send(LinkStatus {
                    state: LinkState::Connected,
                    port: Some(port.clone()),
                });
                let _ = events.send(LinkEvent::Connected { port });

                let reason = pump(transport, &events, &mut cmd_rx, &cancel).await;
                warn!(reason = %reason, "device disconnected");
                status_tx.send_modify(|s| s.state = LinkState::Disconnected);
                let shutting_down = reason == DisconnectReason::Shutdown;
                let _ = events.send(LinkEvent::Disconnected { reason });
                if shutting_down {
                    return;
                }
            }
            Err(e) => {
                failed_attempts += 1;
                debug!(attempt = failed_attempts, error = %e, "connection attempt failed");
                if !config.reconnect.should_retry(failed_attempts) {
                    error!(
                        attempts = failed_attempts,
                        "giving up on device connection"
                    );
                    status_tx.send_modify(|s| s.state = LinkState::Disconnected);
                    return;
                }
            }
        }

        // No queuing across a disconnect; fail anything already in flight.
        while let Ok(req) = cmd_rx.try_recv() {
            let _ = req.reply.send(false);
        }

        let attempt = failed_attempts.max(1);
        let delay = config.reconnect.delay_for_attempt(attempt);
        let _ = events.send(LinkEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pump frames and commands until the connection drops.
///
/// The reader runs in its own task feeding an internal channel, so this
/// loop stays cancel-safe and outbound writes never wait behind a blocked
/// read.
async fn pump(
    transport: Box<dyn Transport>,
    events: &EventSender,
    cmd_rx: &mut mpsc::Receiver<CommandRequest>,
    cancel: &CancellationToken,
) -> DisconnectReason {
    let link = Link::new(transport);
    let (mut reader, mut writer) = link.into_parts();

    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let read_task = tokio::spawn(async move {
        loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).await.is_err() {
                        return DisconnectReason::Shutdown;
                    }
                }
                Ok(None) => return DisconnectReason::DeviceClosed,
                Err(e) => return DisconnectReason::Error(e.to_string()),
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                read_task.abort();
                return DisconnectReason::Shutdown;
            }
            frame = frame_rx.recv() => match frame {
                Some(frame) => {
                    let _ = events.send(LinkEvent::Frame(frame));
                }
                None => {
                    return read_task
                        .await
                        .unwrap_or(DisconnectReason::Error("reader task failed".to_string()));
                }
            },
            request = cmd_rx.recv() => match request {
                Some(request) => {
                    match write_command(&mut writer, &request.command).await {
                        Ok(()) => {
                            let _ = request.reply.send(true);
                        }
                        Err(e) => {
                            let _ = request.reply.send(false);
                            read_task.abort();
                            return DisconnectReason::Error(e.to_string());
                        }
                    }
                }
                None => {
                    // All handles dropped; nothing left to serve.
                    read_task.abort();
                    return DisconnectReason::Shutdown;
                }
            },
        }
    }
}

async fn write_command(
    writer: &mut FrameWriter<Box<dyn Transport>>,
    command: &Command,
) -> Result<()> {
    writer.send(command).await
}

/// A connector handing out a fixed sequence of in-memory transports.
/// Available outside tests so downstream crates can test against it.
#[doc(hidden)]
pub struct QueueConnector {
    transports: Mutex<VecDeque<tokio::io::DuplexStream>>,
}

impl QueueConnector {
    #[doc(hidden)]
    pub fn new(transports: Vec<tokio::io::DuplexStream>) -> Self {
        Self {
            transports: Mutex::new(transports.into()),
        }
    }
}

#[async_trait]
impl Connector for QueueConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, String)> {
        let next = match self.transports.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => None,
        };
        match next {
            Some(transport) => Ok((Box::new(transport) as Box<dyn Transport>, "mock".to_string())),
            None => Err(Error::PortNotFound(
                crate::error::PortNotFoundReason::NoPortsAvailable,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use crate::framing::SerialFrame;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> LinkConfig {
        LinkConfig {
            reconnect: ReconnectOptions::new().initial_delay(Duration::from_millis(10)),
            ..LinkConfig::default()
        }
    }

    async fn next_event(rx: &mut EventReceiver) -> LinkEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn wait_connected(rx: &mut EventReceiver) -> String {
        loop {
            if let LinkEvent::Connected { port } = next_event(rx).await {
                return port;
            }
        }
    }

    #[tokio::test]
    async fn test_connect_and_receive_frames() {
        let (client, mut server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let mut events = handle.subscribe();

        assert_eq!(wait_connected(&mut events).await, "mock");
        assert!(handle.is_connected());
        assert_eq!(handle.status().port.as_deref(), Some("mock"));

        server
            .write_all(b"{\"type\":\"device_ready\"}\n")
            .await
            .unwrap();

        match next_event(&mut events).await {
            LinkEvent::Frame(SerialFrame::Json(msg)) => {
                assert_eq!(msg.kind(), Some("device_ready"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        handle.shutdown();
        loop {
            match timeout(WAIT, events.recv()).await.unwrap() {
                Ok(LinkEvent::Disconnected { reason }) => {
                    assert_eq!(reason, DisconnectReason::Shutdown);
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn test_send_writes_to_transport() {
        let (client, mut server) = tokio::io::duplex(1024);
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![client]));
        let mut events = handle.subscribe();
        wait_connected(&mut events).await;

        handle
            .send(Command::new("get_status"))
            .await
            .expect("send should succeed while connected");

        let mut buf = vec![0u8; 256];
        let n = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf[..n]),
            "{\"command\":\"get_status\"}\n"
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_reconnects_after_device_closes() {
        let (client1, server1) = tokio::io::duplex(1024);
        let (client2, _server2) = tokio::io::duplex(1024);
        let handle = LinkSupervisor::spawn_with_connector(
            fast_config(),
            QueueConnector::new(vec![client1, client2]),
        );
        let mut events = handle.subscribe();
        wait_connected(&mut events).await;

        drop(server1);

        let mut saw_disconnect = false;
        let mut saw_scheduled = false;
        loop {
            match next_event(&mut events).await {
                LinkEvent::Disconnected { reason } => {
                    assert_eq!(reason, DisconnectReason::DeviceClosed);
                    saw_disconnect = true;
                }
                LinkEvent::ReconnectScheduled { attempt, .. } => {
                    assert_eq!(attempt, 1);
                    saw_scheduled = true;
                }
                LinkEvent::Connected { .. } => break,
                LinkEvent::Frame(_) => continue,
            }
        }
        assert!(saw_disconnect);
        assert!(saw_scheduled);
        assert!(handle.is_connected());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_fast() {
        // Connector with no transports: every attempt fails.
        let handle =
            LinkSupervisor::spawn_with_connector(fast_config(), QueueConnector::new(vec![]));

        let err = handle.send(Command::new("get_status")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let config = LinkConfig {
            reconnect: ReconnectOptions::new()
                .initial_delay(Duration::from_millis(1))
                .max_attempts(2),
            ..LinkConfig::default()
        };
        let handle = LinkSupervisor::spawn_with_connector(config, QueueConnector::new(vec![]));
        let mut status = handle.watch_status();

        timeout(WAIT, async {
            loop {
                if status.changed().await.is_err() {
                    break;
                }
                if status.borrow().state == LinkState::Disconnected {
                    break;
                }
            }
        })
        .await
        .ok();
        // After exhausting attempts the supervisor parks in Disconnected.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().state, LinkState::Disconnected);
    }
}
