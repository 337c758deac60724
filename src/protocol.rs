//! Wire protocol codec for the energy meter.
//!
//! Protocol Overview:
//! - Format: ASCII command/response, newline-terminated
//! - Commands: `WAVELENGTH <nm:1dp>`, `ENERGY?`, `*IDN?`, `*RST`
//! - Energy responses: a decimal magnitude followed by a unit token
//!   (`mJ` | `J` | `uJ`), e.g. `"12.5 mJ"`
//!
//! The codec is pure and synchronous; it never touches the transport.
//! Readings are normalized to millijoules. A response that does not match
//! the expected pattern is a data-quality signal, not a failure: the decoder
//! reports a zero-valued reading carrying the raw text and logs a warning.

use crate::error::{MeterError, MeterResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Device identity query.
pub const IDENTIFY: &str = "*IDN?";
/// Device reset command.
pub const RESET: &str = "*RST";
/// Pulse energy query.
pub const ENERGY_QUERY: &str = "ENERGY?";

/// Lower bound of the tunable range, inclusive.
pub const WAVELENGTH_MIN_NM: f64 = 190.0;
/// Upper bound of the tunable range, inclusive.
pub const WAVELENGTH_MAX_NM: f64 = 1100.0;

/// First decimal magnitude followed (optionally with whitespace) by a unit
/// token. `J` must come last in the alternation so `mJ`/`uJ` win.
#[allow(clippy::expect_used)]
static ENERGY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9]+\.?[0-9]*)\s*(mJ|uJ|µJ|J)").expect("energy pattern compiles")
});

/// One decoded energy measurement, normalized to millijoules.
///
/// `raw` always preserves the device response the value was derived from so
/// callers can audit suspicious readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    /// Normalized magnitude in millijoules; 0.0 when the response was
    /// unrecognizable.
    pub millijoules: f64,
    /// The raw device response text.
    pub raw: String,
}

impl EnergyReading {
    /// A zero reading carrying the given raw text.
    pub fn zero(raw: impl Into<String>) -> Self {
        Self {
            millijoules: 0.0,
            raw: raw.into(),
        }
    }
}

/// Encode a wavelength-set command, validating the tunable range.
///
/// Both range boundaries are inclusive; anything outside fails with
/// [`MeterError::OutOfRange`] before reaching the transport.
pub fn encode_set_wavelength(nm: f64) -> MeterResult<String> {
    if !(WAVELENGTH_MIN_NM..=WAVELENGTH_MAX_NM).contains(&nm) {
        return Err(MeterError::OutOfRange { nm });
    }
    Ok(format!("WAVELENGTH {nm:.1}"))
}

/// Decode an energy response into a normalized reading.
///
/// Uses the first pattern match in the text. Conversion: `J` ×1000,
/// `uJ`/`µJ` ÷1000, `mJ` unchanged. Never fails; an unrecognized response
/// yields a zero reading with the raw text retained.
pub fn decode_energy(response: &str) -> EnergyReading {
    let Some(captures) = ENERGY_PATTERN.captures(response) else {
        warn!(response, "energy response did not match expected pattern");
        return EnergyReading::zero(response);
    };
    let magnitude: f64 = match captures[1].parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(response, "energy magnitude failed to parse");
            return EnergyReading::zero(response);
        }
    };
    let millijoules = match captures[2].to_lowercase().as_str() {
        "j" => magnitude * 1000.0,
        "uj" | "µj" => magnitude / 1000.0,
        _ => magnitude,
    };
    EnergyReading {
        millijoules,
        raw: response.to_string(),
    }
}
