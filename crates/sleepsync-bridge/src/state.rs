//! Application state shared across handlers.
//!
//! The `clients_tx` broadcast channel carries already-serialized JSON
//! text to every connected WebSocket client. Senders never block; a
//! slow client that falls behind the buffer misses messages rather than
//! stalling the relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sleepsync_link::LinkHandle;
use sleepsync_types::DeviceMessage;
use time::OffsetDateTime;
use tokio::sync::{broadcast, RwLock};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Handle to the serial link supervisor.
    pub link: LinkHandle,
    /// Configuration the bridge was started with.
    pub config: Config,
    /// Broadcast channel carrying serialized JSON to WebSocket clients.
    pub clients_tx: broadcast::Sender<String>,
    /// Most recent messages, replayed to clients when they join.
    pub latest: RwLock<LatestMessages>,
    /// Number of connected WebSocket clients.
    client_count: AtomicUsize,
    /// When the bridge started.
    started_at: OffsetDateTime,
}

/// Cache of the most recent message of each replayed kind.
#[derive(Debug, Default)]
pub struct LatestMessages {
    /// Last `sensor_data` message.
    pub sensor_data: Option<DeviceMessage>,
    /// Last `device_status` message.
    pub device_status: Option<DeviceMessage>,
}

impl AppState {
    /// Create new application state.
    pub fn new(link: LinkHandle, config: Config) -> Arc<Self> {
        let (clients_tx, _) = broadcast::channel(config.server.broadcast_buffer);
        Arc::new(Self {
            link,
            config,
            clients_tx,
            latest: RwLock::new(LatestMessages::default()),
            client_count: AtomicUsize::new(0),
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Broadcast a JSON payload to all connected clients.
    ///
    /// Returns the number of clients that will receive it.
    pub fn broadcast(&self, payload: String) -> usize {
        self.clients_tx.send(payload).unwrap_or(0)
    }

    /// Number of connected WebSocket clients.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    /// Register a client connection. Returns the new count.
    pub fn client_connected(&self) -> usize {
        self.client_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Register a client disconnect. Returns the new count.
    pub fn client_disconnected(&self) -> usize {
        self.client_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    /// Seconds since the bridge started.
    pub fn uptime_secs(&self) -> u64 {
        let elapsed = OffsetDateTime::now_utc() - self.started_at;
        elapsed.whole_seconds().max(0) as u64
    }
}
