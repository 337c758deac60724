//! Multi-wavelength measurement sequencer.
//!
//! A sweep runs one measurement session over an ordered set of wavelengths:
//!
//! ```text
//! Idle ──run()──> Running ──> Completed | Cancelled | Failed ──> Idle
//! ```
//!
//! For each accepted wavelength, ascending: tune the instrument, wait the
//! stabilization delay (physical settling time), query energy, append a
//! [`MeasurementPoint`]. A fault at one point is recorded and the sweep
//! continues; cancellation is cooperative and checked before each point and
//! inside the stabilization wait. Points are append-only and never mutated
//! after creation.
//!
//! The sweep never issues two exchanges in parallel — it is an ordinary
//! serialized caller of [`EnergyMeter`].

use crate::error::{MeterError, MeterResult};
use crate::link::cancellable_sleep;
use crate::meter::EnergyMeter;
use crate::protocol::{EnergyReading, WAVELENGTH_MAX_NM, WAVELENGTH_MIN_NM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default pause between tuning the wavelength and querying energy,
/// representing the instrument's physical settling time.
pub const STABILIZATION_DELAY: Duration = Duration::from_millis(500);

/// Sweep session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    /// No sweep in progress; ready to run.
    Idle,
    /// A sweep is executing.
    Running,
    /// The last sweep ran to the end of its plan.
    Completed,
    /// The last sweep was cancelled by the caller.
    Cancelled,
    /// The last sweep aborted on a session-level fault.
    Failed,
}

/// Outcome of a single measurement point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointStatus {
    /// Wavelength set and energy decoded.
    Success,
    /// A transport or device fault; the sweep continued.
    Error,
    /// Cancellation arrived while this point was in flight.
    Cancelled,
}

/// One record in a sweep's result log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementPoint {
    /// 1-based sequence id within the sweep.
    pub index: usize,
    /// Requested wavelength in nanometers.
    pub wavelength_nm: f64,
    /// Decoded energy (zero-valued for Error/Cancelled points).
    pub energy: EnergyReading,
    /// When the point was recorded.
    pub timestamp: DateTime<Utc>,
    /// Point outcome.
    pub status: PointStatus,
    /// Free-text note: the raw response, the error text, or the
    /// cancellation message.
    pub note: String,
}

/// Progress snapshot published over a watch channel while a sweep runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepProgress {
    /// Session state.
    pub state: SweepState,
    /// Points fully completed so far.
    pub completed: usize,
    /// Accepted points in the plan.
    pub total: usize,
    /// `completed / total * 100`.
    pub percent: f64,
    /// Human-readable status line.
    pub message: String,
}

impl Default for SweepProgress {
    fn default() -> Self {
        Self {
            state: SweepState::Idle,
            completed: 0,
            total: 0,
            percent: 0.0,
            message: "ready for measurements".to_string(),
        }
    }
}

/// Final accounting for one sweep session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Wavelengths accepted after dedup/range-filter/sort.
    pub accepted: usize,
    /// Input entries dropped for being outside the tunable range.
    pub rejected: usize,
    /// Points with status Success.
    pub succeeded: usize,
    /// Points with status Error.
    pub failed: usize,
    /// Points with status Cancelled (0 or 1).
    pub cancelled: usize,
    /// The ordered result log.
    pub points: Vec<MeasurementPoint>,
}

enum PointOutcome {
    Done(MeasurementPoint),
    Cancelled(MeasurementPoint),
}

/// Drives multi-wavelength sweeps against one [`EnergyMeter`].
///
/// Cheap to clone; clones share the running/cancel/progress state, so a
/// consumer can hold one clone to observe and cancel while another runs.
#[derive(Clone)]
pub struct WavelengthSweep {
    meter: EnergyMeter,
    stabilization: Duration,
    active: Arc<AtomicBool>,
    cancel_tx: Arc<watch::Sender<bool>>,
    progress_tx: Arc<watch::Sender<SweepProgress>>,
}

impl WavelengthSweep {
    /// Create a sequencer with the default stabilization delay.
    pub fn new(meter: EnergyMeter) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (progress_tx, _) = watch::channel(SweepProgress::default());
        Self {
            meter,
            stabilization: STABILIZATION_DELAY,
            active: Arc::new(AtomicBool::new(false)),
            cancel_tx: Arc::new(cancel_tx),
            progress_tx: Arc::new(progress_tx),
        }
    }

    /// Override the stabilization delay (fast instruments, tests).
    pub fn with_stabilization(mut self, delay: Duration) -> Self {
        self.stabilization = delay;
        self
    }

    /// Subscribe to progress snapshots.
    pub fn progress(&self) -> watch::Receiver<SweepProgress> {
        self.progress_tx.subscribe()
    }

    /// Whether a sweep is currently running.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Request cooperative cancellation of the running sweep.
    pub fn cancel(&self) {
        info!("sweep cancellation requested");
        let _ = self.cancel_tx.send(true);
    }

    /// Parse a free-text wavelength list: values separated by commas,
    /// semicolons, or whitespace. Unparseable tokens are dropped. Range
    /// filtering happens later, in [`plan`](Self::plan).
    pub fn parse_wavelengths(input: &str) -> Vec<f64> {
        input
            .split([',', ';', ' ', '\t', '\r', '\n'])
            .filter(|token| !token.is_empty())
            .filter_map(|token| token.trim().parse::<f64>().ok())
            .collect()
    }

    /// Normalize a raw wavelength list into an execution plan: drop
    /// out-of-range entries (returning how many), deduplicate, and sort
    /// ascending.
    pub fn plan(wavelengths: &[f64]) -> (Vec<f64>, usize) {
        let mut accepted: Vec<f64> = Vec::with_capacity(wavelengths.len());
        let mut rejected = 0;
        for &nm in wavelengths {
            if (WAVELENGTH_MIN_NM..=WAVELENGTH_MAX_NM).contains(&nm) {
                accepted.push(nm);
            } else {
                rejected += 1;
            }
        }
        accepted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        accepted.dedup();
        (accepted, rejected)
    }

    /// Run one sweep session over `wavelengths`.
    ///
    /// Fails with [`MeterError::AlreadyRunning`] when a session is active,
    /// [`MeterError::EmptyInput`] when nothing survives range filtering, and
    /// [`MeterError::NotConnected`] when the link is closed — all before any
    /// I/O. Per-point faults never abort the session.
    pub async fn run(&self, wavelengths: &[f64]) -> MeterResult<SweepSummary> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MeterError::AlreadyRunning);
        }
        let _active = ActiveGuard(Arc::clone(&self.active));
        let _ = self.cancel_tx.send(false);

        let (plan, rejected) = Self::plan(wavelengths);
        if plan.is_empty() {
            warn!("no valid wavelengths in range after filtering");
            return Err(MeterError::EmptyInput);
        }
        if !self.meter.link().is_connected() {
            self.publish(SweepState::Failed, 0, plan.len(), "not connected".to_string());
            return Err(MeterError::NotConnected);
        }

        let total = plan.len();
        info!(total, rejected, "starting wavelength sweep");
        self.publish(
            SweepState::Running,
            0,
            total,
            format!("starting measurements for {total} wavelengths"),
        );

        let mut points = Vec::with_capacity(total);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut was_cancelled = false;
        for (i, &nm) in plan.iter().enumerate() {
            if *cancel_rx.borrow() {
                info!(next_point = i + 1, "sweep cancelled between points");
                was_cancelled = true;
                break;
            }
            let index = i + 1;
            self.publish(
                SweepState::Running,
                i,
                total,
                format!("measuring wavelength {index}/{total}: {nm:.1} nm"),
            );
            match self.measure_point(index, nm, &mut cancel_rx).await {
                PointOutcome::Done(point) => points.push(point),
                PointOutcome::Cancelled(point) => {
                    points.push(point);
                    was_cancelled = true;
                    break;
                }
            }
        }

        let succeeded = count(&points, PointStatus::Success);
        let failed = count(&points, PointStatus::Error);
        let cancelled = count(&points, PointStatus::Cancelled);
        let state = if was_cancelled {
            SweepState::Cancelled
        } else {
            SweepState::Completed
        };
        let message = format!(
            "measurements completed: {succeeded} successful, {failed} errors, {cancelled} cancelled"
        );
        self.publish(state, points.len(), total, message.clone());
        info!(succeeded, failed, cancelled, "wavelength sweep finished");
        // Back to Idle, ready for the next session; the summary carries the
        // terminal outcome.
        self.publish(SweepState::Idle, points.len(), total, message);

        Ok(SweepSummary {
            accepted: total,
            rejected,
            succeeded,
            failed,
            cancelled,
            points,
        })
    }

    async fn measure_point(
        &self,
        index: usize,
        nm: f64,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> PointOutcome {
        debug!(index, wavelength = nm, "starting measurement point");
        if let Err(e) = self.meter.set_wavelength(nm).await {
            warn!(index, wavelength = nm, error = %e, "wavelength set failed; continuing");
            return PointOutcome::Done(Self::error_point(index, nm, &e));
        }

        // Let the instrument settle on the new wavelength.
        if cancellable_sleep(self.stabilization, cancel_rx).await {
            info!(index, wavelength = nm, "measurement cancelled during stabilization");
            return PointOutcome::Cancelled(MeasurementPoint {
                index,
                wavelength_nm: nm,
                energy: EnergyReading::zero(""),
                timestamp: Utc::now(),
                status: PointStatus::Cancelled,
                note: "measurement cancelled".to_string(),
            });
        }

        match self.meter.energy().await {
            Ok(reading) => {
                info!(
                    index,
                    wavelength = nm,
                    energy_mj = reading.millijoules,
                    "measurement point completed"
                );
                let note = format!("Response: {}", reading.raw);
                PointOutcome::Done(MeasurementPoint {
                    index,
                    wavelength_nm: nm,
                    energy: reading,
                    timestamp: Utc::now(),
                    status: PointStatus::Success,
                    note,
                })
            }
            Err(e) => {
                warn!(index, wavelength = nm, error = %e, "energy query failed; continuing");
                PointOutcome::Done(Self::error_point(index, nm, &e))
            }
        }
    }

    fn error_point(index: usize, nm: f64, error: &MeterError) -> MeasurementPoint {
        MeasurementPoint {
            index,
            wavelength_nm: nm,
            energy: EnergyReading::zero(""),
            timestamp: Utc::now(),
            status: PointStatus::Error,
            note: format!("Error: {error}"),
        }
    }

    fn publish(&self, state: SweepState, completed: usize, total: usize, message: String) {
        let percent = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let _ = self.progress_tx.send(SweepProgress {
            state,
            completed,
            total,
            percent,
            message,
        });
    }
}

fn count(points: &[MeasurementPoint], status: PointStatus) -> usize {
    points.iter().filter(|p| p.status == status).count()
}

/// Clears the running flag when the session ends, on every path.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MeterLink;

    #[test]
    fn plan_filters_dedups_and_sorts() {
        let (accepted, rejected) = WavelengthSweep::plan(&[500.0, 500.0, 1200.0, 300.0]);
        assert_eq!(accepted, vec![300.0, 500.0]);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn plan_boundaries_are_inclusive() {
        let (accepted, rejected) = WavelengthSweep::plan(&[190.0, 1100.0, 189.9, 1100.1]);
        assert_eq!(accepted, vec![190.0, 1100.0]);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn parse_splits_on_mixed_separators() {
        let raw = WavelengthSweep::parse_wavelengths("500, 500;\t1200 300\nabc");
        assert_eq!(raw, vec![500.0, 500.0, 1200.0, 300.0]);
    }

    #[test]
    fn parse_of_blank_input_is_empty() {
        assert!(WavelengthSweep::parse_wavelengths("  \n ").is_empty());
    }

    #[tokio::test]
    async fn empty_plan_is_rejected_before_io() {
        let sweep = WavelengthSweep::new(EnergyMeter::new(MeterLink::new()));
        assert!(matches!(
            sweep.run(&[50.0, 1500.0]).await,
            Err(MeterError::EmptyInput)
        ));
        assert!(!sweep.is_running());
    }

    #[tokio::test]
    async fn disconnected_link_fails_the_session() {
        let sweep = WavelengthSweep::new(EnergyMeter::new(MeterLink::new()));
        assert!(matches!(
            sweep.run(&[500.0]).await,
            Err(MeterError::NotConnected)
        ));
        assert!(!sweep.is_running());
    }
}
