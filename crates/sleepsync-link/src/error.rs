//! Error types for sleepsync-link.

use thiserror::Error;

/// Errors that can occur when talking to the device over serial.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Serial port error from the OS driver.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error on the open transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No usable serial port was found.
    #[error("no device port found: {0}")]
    PortNotFound(PortNotFoundReason),

    /// Operation attempted while the link is down.
    #[error("not connected to device")]
    NotConnected,

    /// Failed to encode a command as JSON.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// Operation was cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

/// Reason why no device port was found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PortNotFoundReason {
    /// No serial ports are present on the system.
    NoPortsAvailable,
    /// Ports exist but none matched a known USB-UART bridge.
    NoMatch { scanned: usize },
    /// The explicitly configured port path does not exist.
    NotFound { path: String },
}

impl std::fmt::Display for PortNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPortsAvailable => write!(f, "no serial ports available"),
            Self::NoMatch { scanned } => {
                write!(f, "none of {} port(s) look like an ESP32", scanned)
            }
            Self::NotFound { path } => write!(f, "port '{}' not found", path),
        }
    }
}

impl Error {
    /// Create a port-not-found error for an explicit path.
    pub fn port_not_found(path: impl Into<String>) -> Self {
        Self::PortNotFound(PortNotFoundReason::NotFound { path: path.into() })
    }
}

/// Result type alias using sleepsync-link's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "not connected to device");

        let err = Error::port_not_found("/dev/ttyUSB9");
        assert!(err.to_string().contains("/dev/ttyUSB9"));

        let err = Error::PortNotFound(PortNotFoundReason::NoMatch { scanned: 3 });
        assert!(err.to_string().contains("3 port(s)"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }
}
