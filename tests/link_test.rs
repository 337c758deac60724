//! Integration tests for the link coordination layer: exchange
//! serialization, reader pause/resume around protected exchanges, and
//! connection lifecycle, all against the instrumented mock transport.

use laser_meter::transport::{MockEvent, MockTransport};
use laser_meter::{ConnectionSettings, LinkEvent, MeterError, MeterLink};
use std::time::Duration;
use tokio::time::timeout;

/// A link attached to a fresh mock transport (reader auto-started).
async fn connected_link() -> (MeterLink, laser_meter::transport::MockHandle) {
    let (transport, handle) = MockTransport::new();
    let link = MeterLink::new();
    link.attach(
        Box::new(transport),
        ConnectionSettings::for_port("mock0", 9600),
    )
    .await
    .expect("attach mock transport");
    (link, handle)
}

#[tokio::test]
async fn concurrent_exchanges_never_interleave() {
    let (link, handle) = connected_link().await;
    handle.respond_always("OK").await;
    handle.set_read_delay(Duration::from_millis(20)).await;

    let mut tasks = Vec::new();
    for i in 0..4 {
        let link = link.clone();
        tasks.push(tokio::spawn(
            async move { link.execute(&format!("CMD{i}")).await },
        ));
    }
    for task in tasks {
        assert_eq!(task.await.expect("join").expect("exchange"), "OK");
    }

    // The transport must observe four clean write -> read pairs with no
    // interleaving, regardless of caller concurrency.
    let events: Vec<MockEvent> = handle
        .events()
        .await
        .into_iter()
        .filter(|event| !matches!(event, MockEvent::Drain))
        .collect();
    assert_eq!(events.len(), 16);
    for quad in events.chunks(4) {
        match quad {
            [MockEvent::WriteStart(started), MockEvent::WriteEnd(ended), MockEvent::ReadStart, MockEvent::ReadEnd(_)] => {
                assert_eq!(started, ended);
            }
            other => panic!("interleaved exchange events: {other:?}"),
        }
    }
}

#[tokio::test]
async fn reader_is_stopped_while_exchange_is_in_flight() {
    let (link, handle) = connected_link().await;
    assert!(link.reader_running().await);
    handle.respond_once("ENERGY?", "1.0 mJ").await;
    // Response latency spans several reader cadences: a running reader
    // would drain mid-exchange.
    handle.set_read_delay(Duration::from_millis(150)).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    let response = link.execute("ENERGY?").await.expect("exchange");
    assert_eq!(response, "1.0 mJ");
    assert!(link.reader_running().await, "reader not restarted");

    let events = handle.events().await;
    let write = events
        .iter()
        .position(|event| matches!(event, MockEvent::WriteStart(_)))
        .expect("write recorded");
    let read_end = events
        .iter()
        .rposition(|event| matches!(event, MockEvent::ReadEnd(_)))
        .expect("read recorded");
    assert!(
        events[write..=read_end]
            .iter()
            .all(|event| !matches!(event, MockEvent::Drain)),
        "reader drained during a protected exchange"
    );
}

#[tokio::test]
async fn unsolicited_lines_are_broadcast_in_order() {
    let (link, handle) = connected_link().await;
    let mut events = link.subscribe();
    handle.push_unsolicited("STATUS A").await;
    handle.push_unsolicited("STATUS B").await;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("reader delivered nothing")
            .expect("event channel open");
        if let LinkEvent::DataReceived(line) = event {
            seen.push(line);
        }
    }
    assert_eq!(seen, vec!["STATUS A", "STATUS B"]);
}

#[tokio::test]
async fn executed_commands_are_broadcast_as_written_data() {
    let (link, handle) = connected_link().await;
    handle.respond_always("OK").await;
    let mut events = link.subscribe();

    link.execute("*RST").await.expect("exchange");

    let mut saw_write = false;
    while let Ok(event) = events.try_recv() {
        if matches!(&event, LinkEvent::DataWritten(line) if line == "*RST") {
            saw_write = true;
        }
    }
    assert!(saw_write, "DataWritten event not observed");
}

#[tokio::test]
async fn disconnect_stops_reader_and_is_idempotent() {
    let (link, _handle) = connected_link().await;
    assert!(link.is_connected());
    assert!(link.reader_running().await);
    let mut events = link.subscribe();

    link.disconnect().await;
    assert!(!link.is_connected());
    assert!(!link.reader_running().await, "reader leaked past disconnect");

    // Second close must be a safe no-op.
    link.disconnect().await;
    assert!(!link.is_connected());

    let mut saw_down = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LinkEvent::ConnectionStatus(false)) {
            saw_down = true;
        }
    }
    assert!(saw_down, "ConnectionStatus(false) not observed");
}

#[tokio::test]
async fn reconnect_with_matching_settings_is_idempotent() {
    let (link, _handle) = connected_link().await;

    let (transport, _unused) = MockTransport::new();
    link.attach(
        Box::new(transport),
        ConnectionSettings::for_port("mock0", 9600),
    )
    .await
    .expect("matching settings are an idempotent success");

    let (transport, _unused) = MockTransport::new();
    let result = link
        .attach(
            Box::new(transport),
            ConnectionSettings::for_port("mock1", 19_200),
        )
        .await;
    assert!(matches!(result, Err(MeterError::AlreadyConnected(_))));
}

#[tokio::test]
async fn exchange_failure_releases_the_token() {
    let (link, handle) = connected_link().await;
    // No scripted response: the read times out.
    assert!(matches!(
        link.execute("ENERGY?").await,
        Err(MeterError::Timeout)
    ));

    // A faulted exchange must not deadlock the next caller.
    handle.respond_always("OK").await;
    assert_eq!(link.execute("*IDN?").await.expect("exchange"), "OK");
}
