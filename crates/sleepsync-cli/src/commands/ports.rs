//! Ports command implementation.

use anyhow::{Context, Result};

use super::OutputFormat;

pub fn cmd_ports(format: OutputFormat) -> Result<()> {
    let ports = sleepsync_link::list_ports().context("Failed to enumerate serial ports")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ports)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found.");
                return Ok(());
            }
            for port in &ports {
                let marker = if port.is_esp32 { " [esp32]" } else { "" };
                println!("{}  {}{}", port.path, port.description(), marker);
            }
        }
    }

    Ok(())
}
