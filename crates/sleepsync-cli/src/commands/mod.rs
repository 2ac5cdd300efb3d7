//! Command implementations.

pub mod ports;
pub mod send;
pub mod status;
pub mod watch;

use clap::ValueEnum;

/// Output format for commands that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}
