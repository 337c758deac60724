//! # laser-meter
//!
//! Async serial control core for a laser energy-measurement instrument:
//! connection lifecycle, a continuously running unsolicited-data reader, a
//! command synchronizer that serializes request/response exchanges, a pure
//! protocol codec, and a multi-wavelength measurement sequencer.
//!
//! ## Crate Structure
//!
//! - **`settings`**: [`ConnectionSettings`] describing one serial connection
//!   (port, baud, framing, timeouts); plain serde data.
//! - **`transport`**: the [`transport::Transport`] seam plus the tokio-serial
//!   implementation and an instrumented mock for tests.
//! - **`link`**: [`MeterLink`], the coordination layer — transport handle,
//!   continuous reader, command synchronizer, and event broadcast.
//! - **`protocol`**: the wire codec — wavelength-set encoding with range
//!   validation, energy decoding with unit normalization, fixed command
//!   literals.
//! - **`meter`**: [`EnergyMeter`] device verbs (set wavelength, query
//!   energy, identify, reset).
//! - **`sweep`**: [`WavelengthSweep`], the measurement sequencer with
//!   cancellation and per-point result accounting.
//! - **`error`**: the [`MeterError`] taxonomy.
//! - **`logging`**: tracing-subscriber setup for hosts without their own.
//!
//! ## Example
//!
//! ```no_run
//! use laser_meter::{ConnectionSettings, EnergyMeter, MeterLink, WavelengthSweep};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     laser_meter::logging::init()?;
//!
//!     let link = MeterLink::new();
//!     link.connect(ConnectionSettings::for_port("/dev/ttyUSB0", 9600))
//!         .await?;
//!
//!     let meter = EnergyMeter::new(link.clone());
//!     println!("device: {}", meter.identify().await?);
//!
//!     let sweep = WavelengthSweep::new(meter);
//!     let summary = sweep.run(&[355.0, 532.0, 1064.0]).await?;
//!     println!("{} points measured", summary.succeeded);
//!
//!     link.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod link;
pub mod logging;
pub mod meter;
pub mod protocol;
pub mod settings;
pub mod sweep;
pub mod transport;

pub use error::{MeterError, MeterResult};
pub use link::{ConnectionState, LinkEvent, MeterLink};
pub use meter::EnergyMeter;
pub use protocol::EnergyReading;
pub use settings::{ConnectionSettings, Parity};
pub use sweep::{
    MeasurementPoint, PointStatus, SweepProgress, SweepState, SweepSummary, WavelengthSweep,
};
