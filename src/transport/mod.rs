//! Transport abstraction over the serial line.
//!
//! The [`Transport`] trait is the seam between the coordination layer and the
//! physical byte stream: [`serial::SerialTransport`] implements it over a
//! tokio-serial port, while [`mock::MockTransport`] provides a scripted,
//! instrumented stand-in for tests and hosts without hardware.
//!
//! Implementations take `&mut self`; exclusive access is enforced one level
//! up, where the link keeps the active transport behind a single async mutex.

pub mod mock;
pub mod serial;

pub use mock::{MockEvent, MockHandle, MockTransport};
pub use serial::SerialTransport;

use crate::error::MeterResult;
use async_trait::async_trait;

/// Line-oriented byte transport to the instrument.
#[async_trait]
pub trait Transport: Send {
    /// Write one newline-terminated command line.
    ///
    /// Bounded by the configured write timeout; elapsing yields
    /// [`crate::MeterError::Timeout`].
    async fn write_line(&mut self, line: &str) -> MeterResult<()>;

    /// Read one response line, trimmed of the terminator.
    ///
    /// Blocks up to the configured read timeout.
    async fn read_line(&mut self) -> MeterResult<String>;

    /// Drain whatever bytes are available right now without waiting for a
    /// complete line. Returns an empty string when the line is quiet.
    async fn drain_pending(&mut self) -> MeterResult<String>;
}

/// List the serial port names visible on this host, in enumeration order.
///
/// Enumeration failures are logged and reported as an empty list; this never
/// errors to the caller.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => {
            let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
            tracing::debug!(count = names.len(), "enumerated serial ports");
            names
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate serial ports");
            Vec::new()
        }
    }
}
