//! Watch command implementation.

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use sleepsync_link::{LinkConfig, LinkEvent, LinkSupervisor, SerialFrame};
use sleepsync_types::DeviceMessage;

pub async fn cmd_watch(port: Option<String>, baud: u32, raw: bool, json: bool) -> Result<()> {
    let config = LinkConfig {
        port,
        baud,
        ..LinkConfig::default()
    };
    let handle = LinkSupervisor::spawn(config);
    let mut events = handle.subscribe();

    tracing::info!("Watching device messages, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(LinkEvent::Connected { port }) => {
                    tracing::info!("Connected on {}", port);
                }
                Ok(LinkEvent::Disconnected { reason }) => {
                    tracing::warn!("Disconnected: {}", reason);
                }
                Ok(LinkEvent::ReconnectScheduled { attempt, delay_ms }) => {
                    tracing::info!("Reconnecting (attempt {}) in {}ms", attempt, delay_ms);
                }
                Ok(LinkEvent::Frame(SerialFrame::Json(msg))) => {
                    println!("{}", format_message(&msg, json));
                }
                Ok(LinkEvent::Frame(SerialFrame::Text(line))) => {
                    if raw {
                        println!("{}", line);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Dropped {} messages, printing is too slow", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown();
    Ok(())
}

/// Render a message: a one-line summary for the known kinds, raw JSON for
/// everything else (and for everything when `--json` is set).
fn format_message(msg: &DeviceMessage, json: bool) -> String {
    if !json {
        if let Some(data) = msg.sensor_data() {
            return format!(
                "sensor_data    light={:<4} sound={} temp={:.1}C humidity={:.1}% t={}",
                data.light_level,
                if data.sound_detected { "yes" } else { "no " },
                data.temperature,
                data.humidity,
                data.timestamp,
            );
        }
        if let Some(status) = msg.device_status() {
            return format!(
                "device_status  alarm={}{} sunrise={} sunset={} freq={}Hz vol={} rgb=({},{},{})",
                if status.alarm_enabled { "on" } else { "off" },
                if status.alarm_active { "(ringing)" } else { "" },
                status.sunrise_active,
                status.sunset_active,
                status.alarm_frequency,
                status.alarm_volume,
                status.rgb.red,
                status.rgb.green,
                status.rgb.blue,
            );
        }
    }
    msg.as_value().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sensor_data_summary() {
        let msg = DeviceMessage::from_json(
            r#"{"type":"sensor_data","data":{"light_level":2048,"sound_detected":true,"temperature":20.5,"humidity":45.0,"timestamp":99}}"#,
        )
        .unwrap();

        let line = format_message(&msg, false);
        assert!(line.starts_with("sensor_data"));
        assert!(line.contains("light=2048"));
        assert!(line.contains("temp=20.5C"));

        // --json forces raw output.
        let raw = format_message(&msg, true);
        assert!(raw.starts_with('{'));
    }

    #[test]
    fn test_format_unknown_kind_is_raw_json() {
        let msg = DeviceMessage::from_json(r#"{"type":"sound_event","timestamp":5}"#).unwrap();
        let line = format_message(&msg, false);
        assert!(line.contains("\"type\":\"sound_event\""));
    }
}
