//! The framed serial link.
//!
//! [`Link`] wraps any `AsyncRead + AsyncWrite` transport with line-based
//! reading through the [`JsonReassembler`] on the inbound side and
//! newline-delimited JSON command writes on the outbound side. Production
//! code uses [`SerialLink`]; tests use `tokio::io::duplex`.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, trace};

use sleepsync_types::Command;

use crate::error::Result;
use crate::framing::{JsonReassembler, SerialFrame};

/// Baud rate the firmware's console runs at.
pub const DEFAULT_BAUD: u32 = 115_200;

/// A framed link over an arbitrary byte transport.
pub struct Link<T> {
    reader: FrameReader<T>,
    writer: FrameWriter<T>,
}

/// A link over a USB serial port.
pub type SerialLink = Link<SerialStream>;

impl<T> Link<T>
where
    T: AsyncRead + AsyncWrite + Send,
{
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Read the next frame. See [`FrameReader::next_frame`].
    pub async fn next_frame(&mut self) -> Result<Option<SerialFrame>> {
        self.reader.next_frame().await
    }

    /// Write a command. See [`FrameWriter::send`].
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.writer.send(command).await
    }

    /// Split into independently owned read and write sides.
    ///
    /// The supervisor runs the reader in its own task so outbound writes
    /// never wait behind a blocked read.
    pub fn into_parts(self) -> (FrameReader<T>, FrameWriter<T>) {
        (self.reader, self.writer)
    }
}

/// The inbound side: lines in, frames out.
pub struct FrameReader<T> {
    reader: BufReader<ReadHalf<T>>,
    reassembler: JsonReassembler,
    raw: Vec<u8>,
}

impl<T: AsyncRead + Send> FrameReader<T> {
    fn new(read_half: ReadHalf<T>) -> Self {
        Self {
            reader: BufReader::new(read_half),
            reassembler: JsonReassembler::new(),
            raw: Vec::with_capacity(256),
        }
    }

    /// Read lines until a frame completes.
    ///
    /// Returns `Ok(None)` on EOF (the device went away). Bytes that are
    /// not valid UTF-8 are replaced rather than treated as an error;
    /// boot-time line noise is normal on ESP32 serial consoles.
    pub async fn next_frame(&mut self) -> Result<Option<SerialFrame>> {
        loop {
            self.raw.clear();
            let n = self.reader.read_until(b'\n', &mut self.raw).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.raw);
            trace!(line = %line.trim_end(), "serial line");
            if let Some(frame) = self.reassembler.push_line(&line) {
                return Ok(Some(frame));
            }
        }
    }
}

/// The outbound side: commands as newline-delimited JSON.
pub struct FrameWriter<T> {
    writer: WriteHalf<T>,
}

impl<T: AsyncWrite + Send> FrameWriter<T> {
    fn new(writer: WriteHalf<T>) -> Self {
        Self { writer }
    }

    /// Serialize a command as one JSON line and flush it.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(command = %command.command, "sent command to device");
        Ok(())
    }
}

/// Open a serial port as a raw async stream.
///
/// 115200 8N1, the firmware's console configuration. DTR/RTS are asserted
/// because some ESP32 boards hold the chip in reset until the host raises
/// them.
pub async fn open_serial_stream(path: &str, baud: u32) -> Result<SerialStream> {
    let builder = tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None);

    let mut stream = builder.open_native_async()?;

    #[cfg(unix)]
    {
        // Allow other tools (flashers, monitors) to share the port.
        let _ = stream.set_exclusive(false);
    }
    {
        use tokio_serial::SerialPort;
        let _ = stream.write_data_terminal_ready(true);
        let _ = stream.write_request_to_send(true);
    }

    Ok(stream)
}

/// Open a serial port as a framed link. See [`open_serial_stream`].
pub async fn open_serial(path: &str, baud: u32) -> Result<SerialLink> {
    Ok(Link::new(open_serial_stream(path, baud).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reads_json_frames() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut link = Link::new(client);

        tokio::io::AsyncWriteExt::write_all(
            &mut server,
            b"{\"type\":\"sensor_data\",\"data\":{\"temperature\":20.5}}\n",
        )
        .await
        .unwrap();

        let frame = link.next_frame().await.unwrap().unwrap();
        match frame {
            SerialFrame::Json(msg) => assert_eq!(msg.kind(), Some("sensor_data")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reads_multi_line_frame_and_text() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut link = Link::new(client);

        tokio::io::AsyncWriteExt::write_all(
            &mut server,
            b"boot banner\n{\n  \"type\": \"device_ready\"\n}\n",
        )
        .await
        .unwrap();

        assert_eq!(
            link.next_frame().await.unwrap(),
            Some(SerialFrame::Text("boot banner".to_string()))
        );
        let frame = link.next_frame().await.unwrap().unwrap();
        match frame {
            SerialFrame::Json(msg) => assert_eq!(msg.kind(), Some("device_ready")),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        let mut link = Link::new(client);
        drop(server);
        assert_eq!(link.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_writes_one_json_line() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut link = Link::new(client);

        let cmd = Command::new("set_rgb").with_data(serde_json::json!({"r": 1, "g": 2, "b": 3}));
        link.send(&cmd).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        let written = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(
            written,
            "{\"command\":\"set_rgb\",\"data\":{\"r\":1,\"g\":2,\"b\":3}}\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_fatal() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut link = Link::new(client);

        tokio::io::AsyncWriteExt::write_all(&mut server, &[0xFF, 0xFE, b'h', b'i', b'\n'])
            .await
            .unwrap();

        let frame = link.next_frame().await.unwrap().unwrap();
        assert!(matches!(frame, SerialFrame::Text(t) if t.ends_with("hi")));
    }
}
