//! High-level device verbs for the energy meter.
//!
//! [`EnergyMeter`] pairs a [`MeterLink`] with the protocol codec so callers
//! work in domain terms (wavelengths, readings) instead of wire text. Every
//! verb routes through [`MeterLink::execute`], so calls from any number of
//! tasks serialize into clean write/read exchanges.

use crate::error::MeterResult;
use crate::link::MeterLink;
use crate::protocol::{self, EnergyReading};

/// Command interface to one laser energy-measurement instrument.
#[derive(Clone)]
pub struct EnergyMeter {
    link: MeterLink,
}

impl EnergyMeter {
    /// Wrap an existing link.
    pub fn new(link: MeterLink) -> Self {
        Self { link }
    }

    /// Access the underlying link (connection lifecycle, events).
    pub fn link(&self) -> &MeterLink {
        &self.link
    }

    /// Tune the instrument to `nm` and return the device acknowledgment.
    ///
    /// The wavelength is validated against the tunable range before any I/O
    /// is attempted.
    pub async fn set_wavelength(&self, nm: f64) -> MeterResult<String> {
        let command = protocol::encode_set_wavelength(nm)?;
        self.link.execute(&command).await
    }

    /// Query the current pulse energy, normalized to millijoules.
    pub async fn energy(&self) -> MeterResult<EnergyReading> {
        let response = self.link.execute(protocol::ENERGY_QUERY).await?;
        Ok(protocol::decode_energy(&response))
    }

    /// Query the device identity string.
    pub async fn identify(&self) -> MeterResult<String> {
        self.link.execute(protocol::IDENTIFY).await
    }

    /// Reset the instrument.
    pub async fn reset(&self) -> MeterResult<String> {
        self.link.execute(protocol::RESET).await
    }
}
