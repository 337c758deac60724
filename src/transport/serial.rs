//! Serial transport over tokio-serial.
//!
//! Protocol framing:
//! - Commands: ASCII, LF-terminated
//! - Responses: free text, LF-terminated
//! - No flow control, no checksums
//!
//! The port is wrapped in a [`BufReader`] so line reads and opportunistic
//! drains share one buffer. All reads and writes are bounded by the timeouts
//! from [`ConnectionSettings`].

use crate::error::{MeterError, MeterResult};
use crate::settings::{ConnectionSettings, Parity};
use crate::transport::Transport;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// How long a drain pass waits for the next chunk before deciding the line
/// is quiet. Deliberately tiny: the continuous reader polls on its own
/// cadence and must not block the transport lock.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Transport over a physical (or USB-virtual) serial port.
pub struct SerialTransport {
    port: BufReader<SerialStream>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SerialTransport {
    /// Open the port described by `settings`.
    ///
    /// Fails with [`MeterError::Connect`] when the settings are invalid
    /// (unsupported parity, data bits, or stop bits) or when the underlying
    /// port cannot be opened (missing, in use, permission).
    pub fn open(settings: &ConnectionSettings) -> MeterResult<Self> {
        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(MeterError::Connect(format!(
                    "unsupported data bits: {other}"
                )))
            }
        };
        let stop_bits = match settings.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(MeterError::Connect(format!(
                    "unsupported stop bits: {other}"
                )))
            }
        };
        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Mark | Parity::Space => {
                return Err(MeterError::Connect(format!(
                    "parity {:?} not supported by this transport",
                    settings.parity
                )))
            }
        };

        let port = tokio_serial::new(&settings.port_name, settings.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MeterError::Connect(format!("{}: {e}", settings.port_name)))?;

        Ok(Self {
            port: BufReader::new(port),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_line(&mut self, line: &str) -> MeterResult<()> {
        let framed = format!("{line}\n");
        match timeout(
            self.write_timeout,
            self.port.get_mut().write_all(framed.as_bytes()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MeterError::Io(e)),
            Err(_) => Err(MeterError::Timeout),
        }
    }

    async fn read_line(&mut self) -> MeterResult<String> {
        let mut line = String::new();
        match timeout(self.read_timeout, self.port.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(MeterError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "serial port closed",
            ))),
            Ok(Ok(_)) => Ok(line.trim().to_string()),
            Ok(Err(e)) => Err(MeterError::Io(e)),
            Err(_) => Err(MeterError::Timeout),
        }
    }

    async fn drain_pending(&mut self) -> MeterResult<String> {
        let mut collected = Vec::new();
        loop {
            let mut chunk = [0u8; 256];
            match timeout(DRAIN_POLL, self.port.read(&mut chunk)).await {
                Ok(Ok(0)) => break, // EOF; the next bounded read reports it
                Ok(Ok(n)) => collected.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(MeterError::Io(e)),
                Err(_) => break, // quiet line
            }
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}
