//! Serial port discovery.
//!
//! ESP32 development boards enumerate as generic USB-UART bridges, so
//! discovery matches port metadata against the chips those boards ship
//! with (Silicon Labs CP210x, WCH CH340, FTDI FT232) rather than looking
//! for anything ESP32-specific.

use serde::Serialize;
use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::{Error, PortNotFoundReason, Result};

/// Case-insensitive markers that identify a likely ESP32 USB-UART bridge.
const KNOWN_USB_MARKERS: &[&str] = &[
    "CP210",
    "CH340",
    "CH910",
    "FT232",
    "FTDI",
    "ESP32",
    "USB-SERIAL",
    "SILICON LABS",
];

/// Silicon Labs (CP210x) USB vendor id.
const SILICON_LABS_VID: u16 = 0x10C4;
/// WCH (CH340/CH910x) USB vendor id.
const WCH_VID: u16 = 0x1A86;

/// Information about a discovered serial port.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPort {
    /// OS path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    /// USB manufacturer string, if available.
    pub manufacturer: Option<String>,
    /// USB product string, if available.
    pub product: Option<String>,
    /// USB serial number, if available.
    pub serial_number: Option<String>,
    /// USB vendor id, if this is a USB port.
    pub vendor_id: Option<u16>,
    /// USB product id, if this is a USB port.
    pub product_id: Option<u16>,
    /// Whether the port looks like an ESP32 USB-UART bridge.
    pub is_esp32: bool,
}

impl DiscoveredPort {
    fn from_info(info: SerialPortInfo) -> Self {
        let (manufacturer, product, serial_number, vendor_id, product_id) = match info.port_type {
            SerialPortType::UsbPort(usb) => (
                usb.manufacturer,
                usb.product,
                usb.serial_number,
                Some(usb.vid),
                Some(usb.pid),
            ),
            _ => (None, None, None, None, None),
        };

        let mut port = Self {
            path: info.port_name,
            manufacturer,
            product,
            serial_number,
            vendor_id,
            product_id,
            is_esp32: false,
        };
        port.is_esp32 = port.classify();
        port
    }

    /// Human-readable description of the port.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(m) = &self.manufacturer {
            parts.push(m.as_str());
        }
        if let Some(p) = &self.product {
            parts.push(p.as_str());
        }
        if let Some(s) = &self.serial_number {
            parts.push(s.as_str());
        }
        if parts.is_empty() {
            "unknown".to_string()
        } else {
            parts.join(" ")
        }
    }

    fn classify(&self) -> bool {
        if let Some(vid) = self.vendor_id {
            if vid == SILICON_LABS_VID || vid == WCH_VID {
                return true;
            }
        }
        matches_known_adapter(&self.description())
    }
}

/// Check a port description against the known USB-UART bridge markers.
pub fn matches_known_adapter(description: &str) -> bool {
    let upper = description.to_uppercase();
    KNOWN_USB_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Options for locating the device port.
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// Explicit port path; skips detection entirely when set.
    pub port: Option<String>,
    /// Fall back to the first enumerated port when nothing matches.
    pub fallback_to_first: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            port: None,
            fallback_to_first: true,
        }
    }
}

impl FindOptions {
    /// Create find options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit port path.
    pub fn port(mut self, path: impl Into<String>) -> Self {
        self.port = Some(path.into());
        self
    }

    /// Enable or disable the first-port fallback.
    pub fn fallback_to_first(mut self, fallback: bool) -> Self {
        self.fallback_to_first = fallback;
        self
    }
}

/// Enumerate serial ports with USB metadata.
pub fn list_ports() -> Result<Vec<DiscoveredPort>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(DiscoveredPort::from_info).collect())
}

/// Locate the port the device is attached to.
///
/// With an explicit `port` the enumeration only verifies it exists. Without
/// one, the first port matching a known USB-UART bridge wins; when
/// `fallback_to_first` is set the first enumerated port is used as a last
/// resort, mirroring plugging in a board with an unrecognized bridge chip.
pub fn find_device_port(options: &FindOptions) -> Result<DiscoveredPort> {
    let ports = list_ports()?;

    if let Some(path) = &options.port {
        return ports
            .into_iter()
            .find(|p| &p.path == path)
            .ok_or_else(|| Error::port_not_found(path.clone()));
    }

    if ports.is_empty() {
        return Err(Error::PortNotFound(PortNotFoundReason::NoPortsAvailable));
    }

    for port in &ports {
        debug!(
            path = %port.path,
            description = %port.description(),
            is_esp32 = port.is_esp32,
            "found serial port"
        );
    }

    if let Some(port) = ports.iter().find(|p| p.is_esp32) {
        info!(path = %port.path, "ESP32 detected at {}", port.path);
        return Ok(port.clone());
    }

    if options.fallback_to_first {
        let first = ports
            .into_iter()
            .next()
            .ok_or(Error::PortNotFound(PortNotFoundReason::NoPortsAvailable))?;
        warn!(
            path = %first.path,
            "no ESP32-specific port found, trying first available"
        );
        return Ok(first);
    }

    Err(Error::PortNotFound(PortNotFoundReason::NoMatch {
        scanned: ports.len(),
    }))
}
