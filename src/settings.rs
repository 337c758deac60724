//! Serial connection settings.
//!
//! [`ConnectionSettings`] captures everything needed to open the line to the
//! instrument. The struct is plain serde data so a host application can load
//! or persist it however it likes; this crate only consumes it. Settings are
//! immutable once a connection is established — changing them requires a
//! disconnect followed by a reconnect.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parity bit configuration for the serial line.
///
/// `Mark` and `Space` exist for completeness of the wire-level contract but
/// are not supported by the async serial transport; attempting to connect
/// with them fails with a connect error before the port is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit (the instrument default).
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Parity bit always 1.
    Mark,
    /// Parity bit always 0.
    Space,
}

/// Settings for one serial connection to the energy meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port name (e.g. "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate; the instrument speaks 9600 by default.
    pub baud_rate: u32,
    /// Data bits per character, typically 8.
    pub data_bits: u8,
    /// Stop bits, 1 or 2.
    pub stop_bits: u8,
    /// Parity configuration.
    pub parity: Parity,
    /// Upper bound on a single line read.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Upper bound on a single line write.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionSettings {
    /// Settings for a port at the given baud rate, everything else default.
    pub fn for_port(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Human-readable label, e.g. `"/dev/ttyUSB0 (9600 baud)"`.
    pub fn display_name(&self) -> String {
        format!("{} ({} baud)", self.port_name, self.baud_rate)
    }
}
