//! Status and health commands, querying a running bridge over HTTP.

use anyhow::{Context, Result};
use serde_json::Value;

use super::OutputFormat;

pub async fn cmd_status(server: &str, format: OutputFormat) -> Result<()> {
    let body = fetch(server, "/status").await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Text => {
            let bridge = &body["bridge"];
            let connected = bridge["connected"].as_bool().unwrap_or(false);
            println!(
                "Device:     {}",
                if connected { "connected" } else { "disconnected" }
            );
            if let Some(port) = bridge["port"].as_str() {
                println!("Port:       {}", port);
            }
            if let Some(state) = bridge["state"].as_str() {
                println!("Link state: {}", state);
            }
            println!("Clients:    {}", bridge["clients"].as_u64().unwrap_or(0));
            if body["last_sensor_data"].is_object() {
                println!("Last data:  {}", body["last_sensor_data"]["data"]);
            }
        }
    }

    Ok(())
}

pub async fn cmd_health(server: &str) -> Result<()> {
    let body = fetch(server, "/health").await?;

    let status = body["status"].as_str().unwrap_or("unknown");
    let connected = body["esp32_connected"].as_bool().unwrap_or(false);
    println!(
        "Bridge {} (device {}, {} client(s), up {}s)",
        status,
        if connected { "connected" } else { "disconnected" },
        body["websocket_clients"].as_u64().unwrap_or(0),
        body["uptime_secs"].as_u64().unwrap_or(0),
    );

    Ok(())
}

async fn fetch(server: &str, path: &str) -> Result<Value> {
    let url = format!("{}{}", server.trim_end_matches('/'), path);
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach the bridge at {}", url))?
        .error_for_status()
        .context("Bridge returned an error")?;
    response.json().await.context("Invalid JSON from the bridge")
}
