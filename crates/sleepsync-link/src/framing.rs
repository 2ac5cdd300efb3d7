//! Reassembly of JSON messages from a line-oriented serial stream.
//!
//! The firmware usually emits one JSON object per line, but its logging
//! macros sometimes pretty-print a message across several lines. The
//! reassembler tracks brace/bracket depth across lines and emits a frame
//! when the depth returns to zero. Depth tracking is string-aware: braces
//! inside JSON string literals (and escaped quotes within them) do not
//! count, which is where naive per-line counting goes wrong.
//!
//! Lines that are not part of a JSON message (boot banners, `ESP_LOGI`
//! output) come through as [`SerialFrame::Text`] so the bridge can still
//! relay or log them.

use sleepsync_types::DeviceMessage;

/// Default cap on the reassembly buffer.
///
/// A device stuck mid-message (or emitting unbalanced braces) must not
/// grow memory without bound; when the cap is hit the buffer is flushed
/// as a text frame and tracking resets.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// One reconstructed frame from the serial stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialFrame {
    /// A complete JSON message.
    Json(DeviceMessage),
    /// A non-JSON line, or a brace-balanced buffer that failed to parse.
    Text(String),
}

impl SerialFrame {
    /// The frame rendered as it should be relayed to clients.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Json(msg) => msg.as_value().to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Incremental multi-line JSON reassembler.
#[derive(Debug)]
pub struct JsonReassembler {
    buffer: String,
    depth: i32,
    in_string: bool,
    escaped: bool,
    max_buffer: usize,
}

impl JsonReassembler {
    /// Create a reassembler with the default buffer cap.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Create a reassembler with a custom buffer cap.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: String::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            max_buffer,
        }
    }

    /// Whether a multi-line message is currently being accumulated.
    pub fn is_accumulating(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Feed one line (without its trailing newline) into the reassembler.
    ///
    /// Returns a frame when one completes. Empty lines outside a
    /// reassembly yield nothing.
    pub fn push_line(&mut self, line: &str) -> Option<SerialFrame> {
        let trimmed = line.trim_end_matches(['\r', '\n', ' ', '\t']);

        if !self.is_accumulating() {
            if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
                if trimmed.is_empty() {
                    return None;
                }
                return Some(SerialFrame::Text(trimmed.to_string()));
            }
            // A string literal cannot legally span lines; starting a new
            // message always starts outside one.
            self.in_string = false;
            self.escaped = false;
            self.depth = 0;
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(trimmed);
        self.scan(trimmed);

        if self.buffer.len() > self.max_buffer {
            tracing::warn!(
                len = self.buffer.len(),
                "reassembly buffer overflow, flushing as text"
            );
            return Some(SerialFrame::Text(self.reset()));
        }

        if self.depth <= 0 {
            let buffer = self.reset();
            return Some(match DeviceMessage::from_json(&buffer) {
                Ok(msg) => SerialFrame::Json(msg),
                Err(_) => SerialFrame::Text(buffer),
            });
        }

        None
    }

    /// Update depth tracking for one line of input.
    fn scan(&mut self, line: &str) {
        for ch in line.chars() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => self.in_string = true,
                '{' | '[' => self.depth += 1,
                '}' | ']' => self.depth -= 1,
                _ => {}
            }
        }
        // An unterminated string at end of line is malformed JSON; reset
        // so the next line is not swallowed into it.
        if self.in_string {
            self.in_string = false;
            self.escaped = false;
        }
    }

    fn reset(&mut self) -> String {
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        std::mem::take(&mut self.buffer)
    }
}

impl Default for JsonReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_frame(frame: Option<SerialFrame>) -> DeviceMessage {
        match frame {
            Some(SerialFrame::Json(msg)) => msg,
            other => panic!("expected JSON frame, got {:?}", other),
        }
    }

    #[test]
    fn test_single_line_json() {
        let mut r = JsonReassembler::new();
        let msg = json_frame(r.push_line(r#"{"type":"sensor_data","data":{"temperature":21.0}}"#));
        assert_eq!(msg.kind(), Some("sensor_data"));
        assert!(!r.is_accumulating());
    }

    #[test]
    fn test_multi_line_pretty_json() {
        let mut r = JsonReassembler::new();
        assert_eq!(r.push_line("{"), None);
        assert_eq!(r.push_line(r#"  "type": "device_status","#), None);
        assert_eq!(r.push_line(r#"  "status": {"#), None);
        assert_eq!(r.push_line(r#"    "alarm_active": true"#), None);
        assert_eq!(r.push_line("  }"), None);
        let msg = json_frame(r.push_line("}"));
        assert_eq!(msg.kind(), Some("device_status"));
    }

    #[test]
    fn test_braces_inside_strings_do_not_count() {
        let mut r = JsonReassembler::new();
        let msg = json_frame(r.push_line(r#"{"type":"device_ready","message":"boot { ok }}}"}"#));
        assert_eq!(msg.kind(), Some("device_ready"));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let mut r = JsonReassembler::new();
        let msg = json_frame(r.push_line(r#"{"msg":"say \"hi\" {"}"#));
        assert_eq!(msg.as_value()["msg"], "say \"hi\" {");
    }

    #[test]
    fn test_plain_text_passthrough() {
        let mut r = JsonReassembler::new();
        let frame = r.push_line("I (1234) BLUELY_SLEEP_PEBBLE: Sensor monitoring task started");
        assert_eq!(
            frame,
            Some(SerialFrame::Text(
                "I (1234) BLUELY_SLEEP_PEBBLE: Sensor monitoring task started".to_string()
            ))
        );
    }

    #[test]
    fn test_empty_and_crlf_lines() {
        let mut r = JsonReassembler::new();
        assert_eq!(r.push_line(""), None);
        assert_eq!(r.push_line("\r"), None);
        let msg = json_frame(r.push_line("{\"a\":1}\r"));
        assert_eq!(msg.as_value()["a"], 1);
    }

    #[test]
    fn test_continuation_lines_join_mid_reassembly() {
        // Matches the original bridge: while depth > 0 every line joins
        // the buffer, even ones that do not start with a brace.
        let mut r = JsonReassembler::new();
        assert_eq!(r.push_line(r#"{"a": 1,"#), None);
        assert!(r.is_accumulating());
        let msg = json_frame(r.push_line(r#" "b": 2}"#));
        assert_eq!(msg.as_value()["b"], 2);
    }

    #[test]
    fn test_unbalanced_buffer_parses_as_text() {
        let mut r = JsonReassembler::new();
        assert_eq!(r.push_line("{\"a\": 1,"), None);
        // Stray extra closer brings depth to zero but the buffer is junk.
        let frame = r.push_line("}}");
        assert!(matches!(frame, Some(SerialFrame::Text(_))));
        assert!(!r.is_accumulating());
    }

    #[test]
    fn test_lone_closing_brace_is_text() {
        let mut r = JsonReassembler::new();
        let frame = r.push_line("}");
        assert_eq!(frame, Some(SerialFrame::Text("}".to_string())));
    }

    #[test]
    fn test_buffer_overflow_flushes_as_text() {
        let mut r = JsonReassembler::with_max_buffer(64);
        assert_eq!(r.push_line("{\"data\": ["), None);
        let frame = r.push_line(&"1,".repeat(64));
        assert!(matches!(frame, Some(SerialFrame::Text(_))));
        assert!(!r.is_accumulating());
        // Tracking has reset; the next message parses normally.
        let msg = json_frame(r.push_line("{\"ok\": true}"));
        assert_eq!(msg.as_value()["ok"], true);
    }

    #[test]
    fn test_array_frame() {
        let mut r = JsonReassembler::new();
        assert_eq!(r.push_line("["), None);
        assert_eq!(r.push_line("  1, 2,"), None);
        let msg = json_frame(r.push_line("  3 ]"));
        assert_eq!(msg.as_value()[2], 3);
    }

    #[test]
    fn test_to_wire() {
        let frame = SerialFrame::Text("hello".to_string());
        assert_eq!(frame.to_wire(), "hello");

        let mut r = JsonReassembler::new();
        let frame = r.push_line("{\"a\": 1}").unwrap();
        assert_eq!(frame.to_wire(), "{\"a\":1}");
    }
}
