//! Integration tests for the wavelength sweep sequencer: input planning,
//! per-point fault isolation, cancellation, and single-run enforcement.

use laser_meter::transport::{MockHandle, MockTransport};
use laser_meter::{
    ConnectionSettings, EnergyMeter, MeterError, MeterLink, PointStatus, SweepState,
    WavelengthSweep,
};
use std::time::Duration;

/// A meter on a mock transport with the continuous reader stopped, keeping
/// exchange timing free of settle delays.
async fn connected_meter() -> (EnergyMeter, MockHandle) {
    let (transport, handle) = MockTransport::new();
    let link = MeterLink::new();
    link.attach(
        Box::new(transport),
        ConnectionSettings::for_port("mock0", 9600),
    )
    .await
    .expect("attach mock transport");
    link.stop_reading().await;
    (EnergyMeter::new(link), handle)
}

#[tokio::test]
async fn sweep_filters_dedupes_and_sorts_its_input() {
    let (meter, handle) = connected_meter().await;
    handle.respond_always("OK").await;
    handle.respond_once("ENERGY?", "1.0 mJ").await;
    handle.respond_once("ENERGY?", "1.0 mJ").await;

    let sweep = WavelengthSweep::new(meter).with_stabilization(Duration::from_millis(10));
    let summary = sweep
        .run(&[500.0, 500.0, 1200.0, 300.0])
        .await
        .expect("sweep");

    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.cancelled, 0);

    let wavelengths: Vec<f64> = summary.points.iter().map(|p| p.wavelength_nm).collect();
    assert_eq!(wavelengths, vec![300.0, 500.0]);
    assert!(summary
        .points
        .iter()
        .all(|p| p.status == PointStatus::Success));
    assert_eq!(summary.points[0].index, 1);
    assert_eq!(summary.points[1].index, 2);
    assert_eq!(summary.points[0].energy.millijoules, 1.0);
    assert!(summary.points[0].note.starts_with("Response:"));

    // Points are visited in ascending order on the wire too.
    let writes = handle.writes().await;
    assert_eq!(
        writes,
        vec!["WAVELENGTH 300.0", "ENERGY?", "WAVELENGTH 500.0", "ENERGY?"]
    );
}

#[tokio::test]
async fn one_failing_point_does_not_abort_the_sweep() {
    let (meter, handle) = connected_meter().await;
    handle.respond_always("OK").await;
    handle.fail_command("WAVELENGTH 400.0").await;
    handle.respond_once("ENERGY?", "2.0 J").await;
    handle.respond_once("ENERGY?", "2.0 J").await;

    let sweep = WavelengthSweep::new(meter).with_stabilization(Duration::from_millis(10));
    let summary = sweep.run(&[300.0, 400.0, 500.0]).await.expect("sweep");

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.points.len(), 3);

    let bad = &summary.points[1];
    assert_eq!(bad.status, PointStatus::Error);
    assert_eq!(bad.wavelength_nm, 400.0);
    assert!(bad.note.starts_with("Error:"));
    assert_eq!(bad.energy.millijoules, 0.0);

    // Joules are normalized to millijoules for the surviving points.
    assert_eq!(summary.points[2].energy.millijoules, 2000.0);
}

#[tokio::test]
async fn cancelling_mid_sweep_records_one_cancelled_point() {
    let (meter, handle) = connected_meter().await;
    handle.respond_always("OK").await;
    for _ in 0..5 {
        handle.respond_once("ENERGY?", "1.0 mJ").await;
    }

    let sweep = WavelengthSweep::new(meter).with_stabilization(Duration::from_millis(300));
    let runner = sweep.clone();
    let task =
        tokio::spawn(async move { runner.run(&[200.0, 300.0, 400.0, 500.0, 600.0]).await });

    // Wait until point 3 is announced, then cancel during its
    // stabilization window.
    let mut progress = sweep.progress();
    loop {
        progress.changed().await.expect("progress channel open");
        let snapshot = progress.borrow_and_update().clone();
        if snapshot.message.contains("3/5") {
            break;
        }
    }
    sweep.cancel();

    let summary = task.await.expect("join").expect("sweep");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.points.len(), 3);

    let last = summary.points.last().expect("points recorded");
    assert_eq!(last.status, PointStatus::Cancelled);
    assert_eq!(last.wavelength_nm, 400.0);

    // The sequencer is ready for the next run.
    assert!(!sweep.is_running());
    assert_eq!(sweep.progress().borrow().state, SweepState::Idle);
}

#[tokio::test]
async fn second_sweep_while_running_is_rejected() {
    let (meter, handle) = connected_meter().await;
    handle.respond_always("OK").await;

    let sweep = WavelengthSweep::new(meter).with_stabilization(Duration::from_millis(300));
    let runner = sweep.clone();
    let task = tokio::spawn(async move { runner.run(&[300.0, 400.0]).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sweep.is_running());
    assert!(matches!(
        sweep.run(&[500.0]).await,
        Err(MeterError::AlreadyRunning)
    ));

    sweep.cancel();
    task.await.expect("join").expect("sweep");
    assert!(!sweep.is_running());
}

#[tokio::test]
async fn sweep_without_connection_fails_before_any_io() {
    let meter = EnergyMeter::new(MeterLink::new());
    let sweep = WavelengthSweep::new(meter);
    assert!(matches!(
        sweep.run(&[500.0]).await,
        Err(MeterError::NotConnected)
    ));
    assert_eq!(sweep.progress().borrow().state, SweepState::Failed);
}
