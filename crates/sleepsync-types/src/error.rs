//! Error types for message parsing and normalization.

use thiserror::Error;

/// Errors that can occur when parsing or normalizing wire messages.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The input was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A command message did not name a command.
    #[error("message has no 'command' or 'type' field")]
    MissingCommand,

    /// The command name was present but empty or not a string.
    #[error("invalid command name: {0}")]
    InvalidCommandName(String),

    /// A command message was not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Result type alias using [`ParseError`].
pub type ParseResult<T> = std::result::Result<T, ParseError>;
