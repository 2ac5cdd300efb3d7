//! Send command implementation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::timeout;

use sleepsync_link::{LinkConfig, LinkEvent, LinkSupervisor, SerialFrame};
use sleepsync_types::{Command, MessageKind};

pub async fn cmd_send(
    command: String,
    data: Option<String>,
    port: Option<String>,
    baud: u32,
    wait: bool,
    timeout_secs: u64,
) -> Result<()> {
    let mut cmd = Command::new(command);
    if let Some(data) = data {
        let value: serde_json::Value =
            serde_json::from_str(&data).context("--data is not valid JSON")?;
        cmd = cmd.with_data(value);
    }

    let config = LinkConfig {
        port,
        baud,
        ..LinkConfig::default()
    };
    let handle = LinkSupervisor::spawn(config);
    let mut events = handle.subscribe();
    let mut status = handle.watch_status();
    let deadline = Duration::from_secs(timeout_secs);

    // Wait for the link to come up before sending. The watch channel
    // covers a connect that lands before we subscribed to events.
    let connected = timeout(deadline, async {
        loop {
            let port = {
                let current = status.borrow();
                current.state.is_connected().then(|| current.port.clone())
            };
            if let Some(port) = port {
                break Some(port);
            }
            if status.changed().await.is_err() {
                break None;
            }
        }
    })
    .await;

    match connected {
        Ok(Some(port)) => {
            tracing::info!("Connected on {}", port.as_deref().unwrap_or("unknown port"))
        }
        Ok(None) => {
            handle.shutdown();
            bail!("Link closed before the device connected");
        }
        Err(_) => {
            handle.shutdown();
            bail!("Timed out waiting for the device to connect");
        }
    }

    let name = cmd.command.clone();
    handle
        .send(cmd)
        .await
        .with_context(|| format!("Failed to send '{}'", name))?;
    tracing::info!("Sent '{}'", name);

    if wait {
        let response = timeout(deadline, async {
            loop {
                match events.recv().await {
                    Ok(LinkEvent::Frame(SerialFrame::Json(msg)))
                        if msg.message_kind() == MessageKind::CommandResponse =>
                    {
                        break Some(msg);
                    }
                    Ok(_) => continue,
                    Err(_) => break None,
                }
            }
        })
        .await;

        match response {
            Ok(Some(msg)) => println!("{}", msg.as_value()),
            Ok(None) => {
                handle.shutdown();
                bail!("Link closed before a response arrived");
            }
            Err(_) => {
                handle.shutdown();
                bail!("Timed out waiting for a command_response");
            }
        }
    }

    handle.shutdown();
    Ok(())
}
