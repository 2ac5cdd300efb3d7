//! Link lifecycle events.
//!
//! The supervisor publishes events through a tokio broadcast channel so
//! any number of consumers (the relay, the CLI watch command, tests) can
//! observe the link without coordinating with each other.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::framing::SerialFrame;

/// Default broadcast capacity. Slow receivers get `Lagged` rather than
/// stalling the pump.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Why the link dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The device closed the stream (EOF), usually an unplug.
    DeviceClosed,
    /// An I/O error terminated the connection.
    Error(String),
    /// The supervisor was shut down.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceClosed => write!(f, "device closed the connection"),
            Self::Error(e) => write!(f, "{}", e),
            Self::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// An event emitted by the link supervisor.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LinkEvent {
    /// The link came up on the given port.
    Connected { port: String },
    /// The link went down.
    Disconnected { reason: DisconnectReason },
    /// A reconnect attempt is scheduled.
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// A frame arrived from the device.
    Frame(SerialFrame),
}

/// Sender half of the event channel.
pub type EventSender = broadcast::Sender<LinkEvent>;
/// Receiver half of the event channel.
pub type EventReceiver = broadcast::Receiver<LinkEvent>;

/// Create an event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}
