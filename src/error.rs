//! Custom error types for the meter control core.
//!
//! This module defines the primary error type, [`MeterError`], used across the
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent taxonomy for everything that can go wrong between a caller and
//! the instrument:
//!
//! - **Connection lifecycle**: `NotConnected`, `AlreadyConnected`, `Connect`.
//! - **Line I/O**: `Timeout` for bounded reads/writes that elapse, `Io` for
//!   any other transport fault.
//! - **Validation**: `OutOfRange` for wavelengths outside the instrument's
//!   tunable range, rejected before any I/O is attempted.
//! - **Sequencer**: `AlreadyRunning` and `EmptyInput` for sweep sessions.
//!
//! An ambiguous energy decode is deliberately *not* an error: the codec
//! reports a zero-valued reading carrying the raw response text and logs a
//! warning, so a noisy instrument never fails a measurement call.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MeterResult<T> = std::result::Result<T, MeterError>;

/// Errors surfaced by the transport, protocol, and sweep layers.
#[derive(Error, Debug)]
pub enum MeterError {
    /// The operation requires an open connection and there is none.
    #[error("serial port not connected")]
    NotConnected,

    /// A connection is already open with different settings.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// The serial port could not be opened or the settings are invalid.
    #[error("failed to open serial port: {0}")]
    Connect(String),

    /// A bounded read or write elapsed without completing.
    #[error("serial operation timed out")]
    Timeout,

    /// Generic transport fault.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wavelength outside the instrument's tunable range.
    #[error("wavelength {nm} nm out of range (190.0-1100.0 nm)")]
    OutOfRange {
        /// The rejected wavelength in nanometers.
        nm: f64,
    },

    /// A sweep session is already in progress.
    #[error("a measurement sweep is already running")]
    AlreadyRunning,

    /// No wavelengths survived range filtering.
    #[error("no valid wavelengths in range after filtering")]
    EmptyInput,
}
