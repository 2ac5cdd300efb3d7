//! SleepSync bridge server.
//!
//! Relays JSON messages between the ESP32 sleep tracker (over USB serial)
//! and web clients (over WebSocket), and exposes a small HTTP API for
//! health checks, status, port listing, and sending commands.
//!
//! The serial side is handled by `sleepsync-link`; this crate owns the
//! server half: shared state, the relay task that fans device frames out
//! to clients, the WebSocket handler, and the REST endpoints.

pub mod api;
pub mod config;
pub mod relay;
pub mod state;
pub mod ws;

pub use config::{Config, ConfigError, LinkSection, ServerConfig, ValidationError};
pub use relay::Relay;
pub use state::AppState;
