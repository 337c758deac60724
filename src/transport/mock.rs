//! Mock transport for testing without an instrument.
//!
//! [`MockTransport`] implements [`Transport`] against scripted responses and
//! records every wire-level operation as a [`MockEvent`], so tests can assert
//! ordering properties (exchanges never interleave, the continuous reader
//! never drains while an exchange is in flight) instead of just payloads.
//!
//! The transport half is handed to the link; the paired [`MockHandle`] stays
//! with the test to script responses, inject unsolicited data, and inspect
//! the recorded event log.
//!
//! All delays use `tokio::time::sleep` and run outside the internal state
//! lock, so concurrent callers really can race — whether they interleave is
//! up to the layer under test.

use crate::error::{MeterError, MeterResult};
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Wire-level operations recorded by the mock, in observed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A write began for the given line.
    WriteStart(String),
    /// The write for the given line completed.
    WriteEnd(String),
    /// A blocking line read began.
    ReadStart,
    /// The read completed with the given line (or timed out empty).
    ReadEnd(String),
    /// The continuous reader drained pending input.
    Drain,
}

struct MockState {
    /// Scripted responses per command; each write of `command` queues the
    /// next response for the following read.
    responses: HashMap<String, VecDeque<String>>,
    /// Fallback response for commands without a script entry.
    default_response: Option<String>,
    /// Commands whose writes fail with an I/O error.
    failing_commands: HashSet<String>,
    /// Responses queued by writes, consumed by reads.
    pending_reads: VecDeque<String>,
    /// Lines delivered through `drain_pending`.
    unsolicited: VecDeque<String>,
    events: Vec<MockEvent>,
    writes: Vec<String>,
    write_delay: Duration,
    read_delay: Duration,
}

/// Scripted [`Transport`] implementation.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side controller paired with a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport/handle pair sharing one scripted state.
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            responses: HashMap::new(),
            default_response: None,
            failing_commands: HashSet::new(),
            pending_reads: VecDeque::new(),
            unsolicited: VecDeque::new(),
            events: Vec::new(),
            writes: Vec::new(),
            write_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    /// Queue one response for the next write of `command`.
    pub async fn respond_once(&self, command: &str, response: &str) {
        let mut state = self.state.lock().await;
        state
            .responses
            .entry(command.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Answer every otherwise-unscripted command with `response`.
    pub async fn respond_always(&self, response: &str) {
        self.state.lock().await.default_response = Some(response.to_string());
    }

    /// Make writes of `command` fail with an I/O error.
    pub async fn fail_command(&self, command: &str) {
        self.state
            .lock()
            .await
            .failing_commands
            .insert(command.to_string());
    }

    /// Inject a line to be picked up by the continuous reader.
    pub async fn push_unsolicited(&self, line: &str) {
        self.state
            .lock()
            .await
            .unsolicited
            .push_back(line.to_string());
    }

    /// Simulate instrument latency on line reads.
    pub async fn set_read_delay(&self, delay: Duration) {
        self.state.lock().await.read_delay = delay;
    }

    /// Simulate latency on writes.
    pub async fn set_write_delay(&self, delay: Duration) {
        self.state.lock().await.write_delay = delay;
    }

    /// All command lines written so far, in order.
    pub async fn writes(&self) -> Vec<String> {
        self.state.lock().await.writes.clone()
    }

    /// The full wire-level event log.
    pub async fn events(&self) -> Vec<MockEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_line(&mut self, line: &str) -> MeterResult<()> {
        let delay = {
            let mut state = self.state.lock().await;
            state.events.push(MockEvent::WriteStart(line.to_string()));
            state.write_delay
        };
        if delay > Duration::ZERO {
            sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        if state.failing_commands.contains(line) {
            state.events.push(MockEvent::WriteEnd(line.to_string()));
            return Err(MeterError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write fault",
            )));
        }
        state.writes.push(line.to_string());
        let scripted = state.responses.get_mut(line).and_then(VecDeque::pop_front);
        let response = scripted.or_else(|| state.default_response.clone());
        if let Some(response) = response {
            state.pending_reads.push_back(response);
        }
        state.events.push(MockEvent::WriteEnd(line.to_string()));
        Ok(())
    }

    async fn read_line(&mut self) -> MeterResult<String> {
        let delay = {
            let mut state = self.state.lock().await;
            state.events.push(MockEvent::ReadStart);
            state.read_delay
        };
        if delay > Duration::ZERO {
            sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        match state.pending_reads.pop_front() {
            Some(line) => {
                state.events.push(MockEvent::ReadEnd(line.clone()));
                Ok(line)
            }
            None => {
                state.events.push(MockEvent::ReadEnd(String::new()));
                Err(MeterError::Timeout)
            }
        }
    }

    async fn drain_pending(&mut self) -> MeterResult<String> {
        let mut state = self.state.lock().await;
        state.events.push(MockEvent::Drain);
        let mut drained = String::new();
        while let Some(line) = state.unsolicited.pop_front() {
            drained.push_str(&line);
            drained.push('\n');
        }
        Ok(drained)
    }
}
