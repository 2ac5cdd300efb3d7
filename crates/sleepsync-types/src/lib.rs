//! Wire-format types for the SleepSync bridge.
//!
//! This crate provides the shared message types exchanged between web
//! clients, the bridge process, and the ESP32 Sleep Pebble firmware:
//!
//! - Command normalization ([`Command`]) for the client-to-device direction
//! - Opaque device messages ([`DeviceMessage`]) with typed views for the
//!   well-known kinds ([`SensorData`], [`DeviceStatus`])
//! - Bridge-originated events ([`BridgeEvent`]) such as connection status
//!   and command acknowledgements
//!
//! The crate is I/O-free so it can be shared by the link layer, the
//! service, and the CLI.

pub mod error;
pub mod message;

pub use error::{ParseError, ParseResult};
pub use message::{
    BridgeEvent, Command, DeviceMessage, DeviceStatus, MessageKind, Rgb, SensorData,
};
