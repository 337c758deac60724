//! Serial link coordination: connection lifecycle, continuous reader, and
//! the command synchronizer.
//!
//! [`MeterLink`] owns the open transport and arbitrates every byte that
//! crosses it:
//!
//! - **Transport handle**: the active [`Transport`] lives behind a single
//!   async mutex; all line-level I/O happens inside a scoped acquisition of
//!   that lock, so reader drains and exchange reads can never corrupt the
//!   stream.
//! - **Continuous reader**: a background task that polls for unsolicited
//!   input on a 50 ms cadence and broadcasts each non-blank line as a
//!   [`LinkEvent::DataReceived`]. Cancellation is cooperative: the loop
//!   re-checks a watch flag at the top of every iteration and inside every
//!   sleep, and a stop request joins the task (bounded at 2 s) rather than
//!   merely signaling it.
//! - **Command synchronizer**: [`MeterLink::execute`] guarantees at most one
//!   request/response exchange in flight. Callers queue FIFO on a
//!   single-slot token; the reader is stopped (joined) and given a 100 ms
//!   settling window before the protected write, and restarted after the
//!   paired read completes or fails, so a response line is never mistaken
//!   for unsolicited data.
//!
//! Events are delivered over a `tokio::sync::broadcast` channel on whatever
//! task context produced them; marshaling to a UI thread is the consumer's
//! concern.

use crate::error::{MeterError, MeterResult};
use crate::settings::ConnectionSettings;
use crate::transport::{SerialTransport, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Cadence of the continuous reader's polling loop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Back-off after a non-timeout fault in the reader loop.
const FAULT_BACKOFF: Duration = Duration::from_secs(1);
/// Settling window after stopping the reader, before a protected write,
/// letting any in-flight drain finish.
const SETTLE_DELAY: Duration = Duration::from_millis(100);
/// Bound on waiting for the reader task to exit; afterwards the task is
/// detached and the transport released regardless.
const READER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection lifecycle states, owned exclusively by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport attached.
    Disconnected,
    /// Open in progress.
    Connecting,
    /// Transport attached and usable.
    Connected,
}

/// Events broadcast to link consumers.
///
/// Fired on whatever task produced them; the link makes no UI-thread
/// guarantee.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Connection opened (`true`) or closed (`false`).
    ConnectionStatus(bool),
    /// An unsolicited line arrived outside a synchronous exchange.
    DataReceived(String),
    /// A command line was written to the transport.
    DataWritten(String),
}

#[derive(Default)]
struct ReaderSlot {
    cancel_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct LinkShared {
    /// The active transport; `None` while disconnected.
    transport: Mutex<Option<Box<dyn Transport>>>,
    /// Single-slot exchange token. tokio's Mutex queues waiters FIFO, which
    /// is the only fairness the exchange contract promises.
    exchange_lock: Mutex<()>,
    reader: Mutex<ReaderSlot>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<LinkEvent>,
    settings: Mutex<Option<ConnectionSettings>>,
}

/// Coordinated access to one serial instrument connection.
///
/// Cheap to clone; clones share the same connection, reader, and exchange
/// token.
#[derive(Clone)]
pub struct MeterLink {
    shared: Arc<LinkShared>,
}

impl Default for MeterLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterLink {
    /// Create a disconnected link.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(LinkShared {
                transport: Mutex::new(None),
                exchange_lock: Mutex::new(()),
                reader: Mutex::new(ReaderSlot::default()),
                state_tx,
                events_tx,
                settings: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Whether a transport is attached and usable.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Settings of the active connection, if any.
    pub async fn current_settings(&self) -> Option<ConnectionSettings> {
        self.shared.settings.lock().await.clone()
    }

    /// Open the serial port described by `settings` and start the continuous
    /// reader.
    ///
    /// Idempotent success when already connected with equal settings;
    /// [`MeterError::AlreadyConnected`] when connected with different ones;
    /// [`MeterError::Connect`] when the port cannot be opened or the
    /// settings are invalid.
    pub async fn connect(&self, settings: ConnectionSettings) -> MeterResult<()> {
        if self.is_connected() {
            return self.reject_reconnect(&settings).await;
        }
        info!(port = %settings.port_name, baud = settings.baud_rate, "opening serial port");
        let transport = match SerialTransport::open(&settings) {
            Ok(transport) => transport,
            Err(e) => {
                error!(port = %settings.port_name, error = %e, "failed to open serial port");
                return Err(e);
            }
        };
        self.attach(Box::new(transport), settings).await
    }

    /// Attach a caller-supplied transport (mock or pre-opened port) with the
    /// same contract as [`connect`](Self::connect).
    pub async fn attach(
        &self,
        transport: Box<dyn Transport>,
        settings: ConnectionSettings,
    ) -> MeterResult<()> {
        {
            let mut slot = self.shared.transport.lock().await;
            if slot.is_some() {
                drop(slot);
                return self.reject_reconnect(&settings).await;
            }
            let _ = self.shared.state_tx.send(ConnectionState::Connecting);
            *slot = Some(transport);
            *self.shared.settings.lock().await = Some(settings.clone());
            let _ = self.shared.state_tx.send(ConnectionState::Connected);
        }
        let _ = self
            .shared
            .events_tx
            .send(LinkEvent::ConnectionStatus(true));
        info!(port = %settings.port_name, baud = settings.baud_rate, "connected");
        self.start_reading().await;
        Ok(())
    }

    async fn reject_reconnect(&self, settings: &ConnectionSettings) -> MeterResult<()> {
        let current = self.current_settings().await;
        if current.as_ref() == Some(settings) {
            warn!(port = %settings.port_name, "already connected with matching settings");
            return Ok(());
        }
        Err(MeterError::AlreadyConnected(
            current.map(|s| s.port_name).unwrap_or_default(),
        ))
    }

    /// Close the connection. Idempotent and infallible: stops the reader
    /// first, drops the transport, and broadcasts the status change.
    pub async fn disconnect(&self) {
        self.stop_reading().await;
        let was_connected = {
            let mut slot = self.shared.transport.lock().await;
            slot.take().is_some()
        };
        let _ = self.shared.state_tx.send(ConnectionState::Disconnected);
        let _ = self
            .shared
            .events_tx
            .send(LinkEvent::ConnectionStatus(false));
        if was_connected {
            let port = self
                .shared
                .settings
                .lock()
                .await
                .as_ref()
                .map(|s| s.port_name.clone())
                .unwrap_or_default();
            info!(port = %port, "disconnected");
        }
    }

    /// Write one command line without claiming the exchange token.
    ///
    /// Fire-and-forget use only; callers needing a paired response must use
    /// [`execute`](Self::execute).
    pub async fn write_line(&self, line: &str) -> MeterResult<()> {
        let mut slot = self.shared.transport.lock().await;
        let transport = slot.as_mut().ok_or(MeterError::NotConnected)?;
        debug!(command = line, "writing line");
        match transport.write_line(line).await {
            Ok(()) => {
                let _ = self
                    .shared
                    .events_tx
                    .send(LinkEvent::DataWritten(line.to_string()));
                Ok(())
            }
            Err(e) => {
                error!(command = line, error = %e, "write failed");
                Err(e)
            }
        }
    }

    /// Read one response line without claiming the exchange token.
    pub async fn read_line(&self) -> MeterResult<String> {
        let mut slot = self.shared.transport.lock().await;
        let transport = slot.as_mut().ok_or(MeterError::NotConnected)?;
        match transport.read_line().await {
            Ok(line) => {
                debug!(response = %line, "read line");
                Ok(line)
            }
            Err(e) => {
                error!(error = %e, "read failed");
                Err(e)
            }
        }
    }

    /// Execute one synchronized request/response exchange.
    ///
    /// Serializes against all other callers via the single-slot token. If
    /// the continuous reader is running it is stopped — joined, not merely
    /// signaled — and given the settling delay before the write; it is
    /// restarted after the paired read completes or fails. The token is
    /// released on every path.
    pub async fn execute(&self, command: &str) -> MeterResult<String> {
        if !self.is_connected() {
            return Err(MeterError::NotConnected);
        }
        debug!(command, "waiting for exchange token");
        let _token = self.shared.exchange_lock.lock().await;
        debug!(command, "exchange token acquired");

        let was_running = self.reader_running().await;
        if was_running {
            self.stop_reading().await;
            sleep(SETTLE_DELAY).await;
        }

        let outcome = self.exchange_once(command).await;

        if was_running {
            self.start_reading().await;
        }
        match &outcome {
            Ok(response) => info!(command, response = %response, "exchange completed"),
            Err(e) => error!(command, error = %e, "exchange failed"),
        }
        outcome
    }

    async fn exchange_once(&self, command: &str) -> MeterResult<String> {
        self.write_line(command).await?;
        self.read_line().await
    }

    /// Whether the continuous reader task is currently running.
    pub async fn reader_running(&self) -> bool {
        let slot = self.shared.reader.lock().await;
        slot.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the continuous reader.
    ///
    /// No-op (with a warning) when already running or not connected.
    pub async fn start_reading(&self) {
        let mut slot = self.shared.reader.lock().await;
        if slot.task.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("continuous reader already active");
            return;
        }
        if !self.is_connected() {
            warn!("cannot start continuous reader: not connected");
            return;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        slot.cancel_tx = Some(cancel_tx);
        slot.task = Some(tokio::spawn(read_loop(shared, cancel_rx)));
        info!("continuous reader started");
    }

    /// Request reader cancellation and wait for the task to exit, bounded by
    /// [`READER_STOP_TIMEOUT`]. Idempotent.
    pub async fn stop_reading(&self) {
        let (cancel_tx, task) = {
            let mut slot = self.shared.reader.lock().await;
            (slot.cancel_tx.take(), slot.task.take())
        };
        if let Some(cancel) = cancel_tx {
            let _ = cancel.send(true);
        }
        let Some(task) = task else { return };
        debug!("stopping continuous reader");
        match timeout(READER_STOP_TIMEOUT, task).await {
            Ok(Ok(())) => info!("continuous reader stopped"),
            Ok(Err(e)) => warn!(error = %e, "continuous reader task join failed"),
            Err(_) => warn!("continuous reader did not stop within bound; detaching"),
        }
    }
}

/// Continuous reader loop: drain available bytes, publish lines, sleep the
/// cadence; swallow quiet timeouts; back off after other faults. Exits on
/// cancellation, disconnect, or transport removal.
async fn read_loop(shared: Arc<LinkShared>, mut cancel_rx: watch::Receiver<bool>) {
    debug!("continuous reader loop entered");
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        if *shared.state_tx.borrow() != ConnectionState::Connected {
            break;
        }
        let drained = {
            let mut slot = shared.transport.lock().await;
            match slot.as_mut() {
                Some(transport) => transport.drain_pending().await,
                None => break,
            }
        };
        let wait = match drained {
            Ok(chunk) => {
                for line in chunk
                    .split(['\r', '\n'])
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                {
                    debug!(line, "unsolicited line received");
                    let _ = shared
                        .events_tx
                        .send(LinkEvent::DataReceived(line.to_string()));
                }
                POLL_INTERVAL
            }
            // A timeout with no data is the normal quiet-line case.
            Err(MeterError::Timeout) => POLL_INTERVAL,
            Err(e) => {
                warn!(error = %e, "continuous reader fault; backing off");
                FAULT_BACKOFF
            }
        };
        if cancellable_sleep(wait, &mut cancel_rx).await {
            break;
        }
    }
    debug!("continuous reader loop exited");
}

/// Sleep for `duration` unless the cancellation flag flips first. Returns
/// `true` when cancellation was observed.
pub(crate) async fn cancellable_sleep(
    duration: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        changed = cancel_rx.changed() => changed.is_err() || *cancel_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_without_connection_fails_fast() {
        let link = MeterLink::new();
        assert!(matches!(
            link.execute("*IDN?").await,
            Err(MeterError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_safe_noop() {
        let link = MeterLink::new();
        link.disconnect().await;
        link.disconnect().await;
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn start_reading_without_connection_is_a_noop() {
        let link = MeterLink::new();
        link.start_reading().await;
        assert!(!link.reader_running().await);
    }

    #[tokio::test]
    async fn cancellable_sleep_observes_cancellation() {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let _ = cancel_tx.send(true);
        assert!(cancellable_sleep(Duration::from_secs(5), &mut cancel_rx).await);
    }
}
