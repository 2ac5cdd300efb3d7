//! Serial link management for the SleepSync bridge.
//!
//! This crate handles everything between a USB serial port and the JSON
//! messages the rest of the system works with:
//!
//! - **Port discovery**: enumerate serial ports and recognize the USB-UART
//!   bridges ESP32 boards ship with (CP210x, CH340, FTDI, ...)
//! - **Framing**: reassemble JSON messages from a line-oriented stream that
//!   may pretty-print a single message across several lines
//! - **Connection lifecycle**: a supervisor task that discovers, connects,
//!   pumps frames, and reconnects with configurable backoff
//! - **Events**: broadcast notifications for connects, disconnects, and
//!   received frames
//!
//! The link is generic over the byte transport, so tests exercise the full
//! stack against in-memory duplex streams instead of hardware.
//!
//! # Quick Start
//!
//! ```no_run
//! use sleepsync_link::{LinkConfig, LinkEvent, LinkSupervisor};
//! use sleepsync_types::Command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handle = LinkSupervisor::spawn(LinkConfig::default());
//!     let mut events = handle.subscribe();
//!
//!     handle.send(Command::new("get_status")).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::Frame(frame) = event {
//!             println!("{:?}", frame);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod framing;
pub mod link;
pub mod reconnect;
pub mod scan;
pub mod supervisor;

pub use error::{Error, PortNotFoundReason, Result};
pub use events::{event_channel, DisconnectReason, EventReceiver, EventSender, LinkEvent};
pub use framing::{JsonReassembler, SerialFrame};
pub use link::{
    open_serial, open_serial_stream, FrameReader, FrameWriter, Link, SerialLink, DEFAULT_BAUD,
};
pub use reconnect::{LinkState, ReconnectOptions};
pub use scan::{find_device_port, list_ports, DiscoveredPort, FindOptions};
pub use supervisor::{
    Connector, LinkConfig, LinkHandle, LinkStatus, LinkSupervisor, SerialConnector, Transport,
};
