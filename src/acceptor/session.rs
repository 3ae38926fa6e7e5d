//! Acceptor session: the polling worker and its control handle.
//!
//! [`AcceptorLink::start`] spawns one worker thread that opens the port,
//! resets and arms the device, then polls until told to stop. The worker is
//! the only owner of the serial handle; the caller side only flips the
//! stop/reset flags and reads the session state. The handle is dropped,
//! once, when the worker returns.
//!
//! ```text
//! Idle -> Connecting -> Polling -> Stopped
//!             |            |
//!             +-> Faulted <+
//! ```

use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::frames::{self, ResponseLayout, RESPONSE_LEN};
use crate::config::SerialConfig;
use crate::error::DeviceError;
use crate::events::EventSender;
use crate::transport::{Connect, Transport};

const STATUS_INITIALIZING: &str = "Initializing...";
const STATUS_READY: &str = "Ready to accept bills";
const STATUS_COMM_ERROR: &str = "Communication error";
const STATUS_REBOOTING: &str = "Rebooting device...";
const STATUS_REBOOTED: &str = "Rebooted. Initialize again.";
const STATUS_REBOOT_FAILED: &str = "Error during reboot";

/// Granularity of interruptible waits.
const PAUSE_SLICE: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Polling,
    Stopped,
    Faulted,
}

/// Protocol delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptorTiming {
    /// After RESET, before arming.
    pub settle_delay: Duration,
    /// After ENABLE_ALL, before the second input flush.
    pub enable_delay: Duration,
    /// Wait for a poll response.
    pub poll_window: Duration,
    /// Between ACK and re-arming.
    pub ack_delay: Duration,
    /// After an operator-requested RESET.
    pub reset_delay: Duration,
}

impl Default for AcceptorTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            enable_delay: Duration::from_millis(200),
            poll_window: Duration::from_millis(100),
            ack_delay: Duration::from_millis(100),
            reset_delay: Duration::from_millis(100),
        }
    }
}

/// State visible from both the caller and the worker.
struct Shared {
    state: Mutex<SessionState>,
    stop: AtomicBool,
    reset: AtomicBool,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

struct Session {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// Control handle
// ---------------------------------------------------------------------------

/// Caller-side handle for bill acceptor sessions on one port.
pub struct AcceptorLink {
    serial: SerialConfig,
    timing: AcceptorTiming,
    layout: ResponseLayout,
    connector: Arc<dyn Connect>,
    events: EventSender,
    session: Option<Session>,
}

impl AcceptorLink {
    pub fn new(connector: Arc<dyn Connect>, serial: SerialConfig, events: EventSender) -> Self {
        Self {
            serial,
            timing: AcceptorTiming::default(),
            layout: ResponseLayout::default(),
            connector,
            events,
            session: None,
        }
    }

    pub fn with_timing(mut self, timing: AcceptorTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_layout(mut self, layout: ResponseLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn port(&self) -> &str {
        &self.serial.path
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.shared.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Begin a new session, ending the current one first.
    ///
    /// Returns once the worker is spawned; connection problems are reported
    /// as a Status event and a `Faulted` state.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.stop();

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Connecting),
            stop: AtomicBool::new(false),
            reset: AtomicBool::new(false),
        });
        let worker = PollWorker {
            serial: self.serial.clone(),
            timing: self.timing,
            layout: self.layout,
            connector: Arc::clone(&self.connector),
            events: self.events.clone(),
            shared: Arc::clone(&shared),
        };

        let handle = thread::Builder::new()
            .name(format!("acceptor-{}", self.serial.path))
            .spawn(move || worker.run())
            .map_err(|e| DeviceError::connection(&self.serial.path, e))?;

        info!(port = %self.serial.path, "Acceptor session started");
        self.session = Some(Session {
            shared,
            worker: Some(handle),
        });
        Ok(())
    }

    /// End the session at the next tick boundary and wait for the worker.
    pub fn stop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.shared.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = session.worker.take() {
            if worker.join().is_err() {
                warn!(port = %self.serial.path, "Acceptor worker panicked");
                session.shared.set_state(SessionState::Faulted);
            } else {
                info!(port = %self.serial.path, state = ?session.shared.state(), "Acceptor session ended");
            }
        }
    }

    /// Hardware-reset the device and end the session.
    ///
    /// Only valid while polling. The device must be initialized again with
    /// [`start`](Self::start) afterwards.
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        if self.state() != SessionState::Polling {
            return Err(DeviceError::NotPolling);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(DeviceError::NotPolling);
        };
        session.shared.reset.store(true, Ordering::SeqCst);
        if let Some(worker) = session.worker.take() {
            if worker.join().is_err() {
                session.shared.set_state(SessionState::Faulted);
                return Err(DeviceError::WorkerPanicked);
            }
        }
        Ok(())
    }
}

impl Drop for AcceptorLink {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct PollWorker {
    serial: SerialConfig,
    timing: AcceptorTiming,
    layout: ResponseLayout,
    connector: Arc<dyn Connect>,
    events: EventSender,
    shared: Arc<Shared>,
}

impl PollWorker {
    fn run(self) {
        let port_name = self.serial.path.clone();

        let mut port = match self.connector.open(&self.serial) {
            Ok(port) => port,
            Err(e) => {
                warn!(port = %port_name, error = %e, "Acceptor port open failed");
                self.events.status(format!("Port error: {port_name}"));
                self.shared.set_state(SessionState::Faulted);
                return;
            }
        };

        self.events.status(STATUS_INITIALIZING);
        let final_state = match self.arm(port.as_mut()) {
            Ok(true) => {
                self.shared.set_state(SessionState::Polling);
                self.events.status(STATUS_READY);
                info!(port = %port_name, "Acceptor ready");
                self.poll_loop(port.as_mut())
            }
            Ok(false) => SessionState::Stopped,
            Err(e) => {
                warn!(port = %port_name, error = %e, "Acceptor initialization failed");
                self.events.status(format!("Port error: {port_name}"));
                SessionState::Faulted
            }
        };

        drop(port);
        self.shared.set_state(final_state);
    }

    /// RESET, settle, flush, ENABLE_ALL, flush. `Ok(false)` if a stop was
    /// requested meanwhile.
    fn arm(&self, port: &mut dyn Transport) -> io::Result<bool> {
        port.write_all(&frames::RESET)?;
        if !self.pause(self.timing.settle_delay) {
            return Ok(false);
        }
        port.clear_input()?;
        port.write_all(&frames::ENABLE_ALL)?;
        if !self.pause(self.timing.enable_delay) {
            return Ok(false);
        }
        port.clear_input()?;
        Ok(true)
    }

    fn poll_loop(&self, port: &mut dyn Transport) -> SessionState {
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return SessionState::Stopped;
            }
            if self.shared.reset.load(Ordering::SeqCst) {
                return self.hardware_reset(port);
            }
            match self.poll_once(port) {
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Acceptor communication lost");
                    self.events.status(STATUS_COMM_ERROR);
                    return SessionState::Faulted;
                }
            }
        }
    }

    /// One POLL round trip. Returns the value of an accepted note.
    fn poll_once(&self, port: &mut dyn Transport) -> Result<Option<u32>, DeviceError> {
        port.write_all(&frames::POLL).map_err(|e| self.fault(e))?;
        thread::sleep(self.timing.poll_window);

        let response = match self.read_response(port) {
            Ok(response) => response,
            Err(e) if !e.is_fatal() => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(value) = self.layout.accepted_bill(&response) else {
            return Ok(None);
        };

        info!(value, "Bill accepted");
        self.events.bill(value);
        port.write_all(&frames::ACK).map_err(|e| self.fault(e))?;
        thread::sleep(self.timing.ack_delay);
        port.write_all(&frames::ENABLE_ALL).map_err(|e| self.fault(e))?;
        Ok(Some(value))
    }

    /// Read one fixed-size response, or whatever arrives before the port
    /// timeout.
    fn read_response(&self, port: &mut dyn Transport) -> Result<Vec<u8>, DeviceError> {
        if port.bytes_to_read().map_err(|e| self.fault(e))? == 0 {
            return Err(DeviceError::ProtocolTimeout {
                window: self.timing.poll_window,
            });
        }

        let mut response = vec![0u8; RESPONSE_LEN];
        let mut filled = 0;
        while filled < RESPONSE_LEN {
            match port.read(&mut response[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(self.fault(e)),
            }
        }
        response.truncate(filled);
        Ok(response)
    }

    fn hardware_reset(&self, port: &mut dyn Transport) -> SessionState {
        self.events.status(STATUS_REBOOTING);
        match port.write_all(&frames::RESET) {
            Ok(()) => {
                thread::sleep(self.timing.reset_delay);
                self.events.status(STATUS_REBOOTED);
                info!(port = %self.serial.path, "Acceptor reset, session ended");
                SessionState::Stopped
            }
            Err(e) => {
                warn!(port = %self.serial.path, error = %e, "Acceptor reset failed");
                self.events.status(STATUS_REBOOT_FAILED);
                SessionState::Faulted
            }
        }
    }

    /// Sleep for `total`, waking early on a stop request. `false` if stopped.
    fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    fn fault(&self, source: io::Error) -> DeviceError {
        DeviceError::FaultedSession {
            port: self.serial.path.clone(),
            source,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, Event, EventReceiver};
    use crate::transport::mock::MockConnector;

    const SAMPLE_5000: [u8; 6] = [0x02, 0x03, 0x06, 0x00, 0x81, 0x07];

    fn fast_timing() -> AcceptorTiming {
        AcceptorTiming {
            settle_delay: Duration::from_millis(1),
            enable_delay: Duration::from_millis(1),
            poll_window: Duration::from_millis(5),
            ack_delay: Duration::from_millis(1),
            reset_delay: Duration::from_millis(1),
        }
    }

    fn link_with(connector: &MockConnector, port: &str) -> (AcceptorLink, EventReceiver) {
        let (tx, rx) = events::channel();
        let link = AcceptorLink::new(
            Arc::new(connector.clone()),
            SerialConfig::acceptor(port),
            tx,
        )
        .with_timing(fast_timing());
        (link, rx)
    }

    /// Drain into `seen` until `done` holds, failing after five seconds.
    fn wait_until(rx: &mut EventReceiver, seen: &mut Vec<Event>, done: impl Fn(&[Event]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            seen.extend(rx.drain());
            if done(seen.as_slice()) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out, events so far: {seen:?}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn bills(events: &[Event]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Bill(b) => Some(b.value),
                Event::Status(_) => None,
            })
            .collect()
    }

    fn has_status(events: &[Event], text: &str) -> bool {
        events.iter().any(|e| matches!(e, Event::Status(s) if s == text))
    }

    #[test]
    fn test_unopenable_port_faults_with_one_status() {
        let connector = MockConnector::default();
        connector.lock().fail_open = true;
        let (mut link, mut rx) = link_with(&connector, "COM9");

        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| !e.is_empty());
        link.stop();

        assert_eq!(link.state(), SessionState::Faulted);
        seen.extend(rx.drain());
        assert_eq!(seen, vec![Event::Status("Port error: COM9".into())]);
        assert_eq!(connector.lock().opens, 0);
    }

    #[test]
    fn test_sample_frame_yields_bill_then_ack_then_enable() {
        let connector = MockConnector::replying_to(&frames::POLL, vec![SAMPLE_5000.to_vec()]);
        let (mut link, mut rx) = link_with(&connector, "MOCK");

        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| !bills(e).is_empty());
        // Let a few empty polls go by.
        thread::sleep(Duration::from_millis(30));
        link.stop();
        seen.extend(rx.drain());

        assert_eq!(bills(&seen), vec![5000]);

        let writes = connector.writes();
        assert_eq!(writes[0], frames::RESET.to_vec());
        assert_eq!(writes[1], frames::ENABLE_ALL.to_vec());
        assert_eq!(writes[2], frames::POLL.to_vec());
        let acks: Vec<usize> = writes
            .iter()
            .enumerate()
            .filter(|(_, w)| w.as_slice() == frames::ACK)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(acks, vec![3]);
        assert_eq!(writes[4], frames::ENABLE_ALL.to_vec());
        assert!(writes[5..].iter().all(|w| w.as_slice() == frames::POLL));
    }

    #[test]
    fn test_status_sequence_on_connect() {
        let connector = MockConnector::default();
        let (mut link, mut rx) = link_with(&connector, "MOCK");
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_READY));
        assert_eq!(link.state(), SessionState::Polling);
        link.stop();

        assert_eq!(
            seen[..2],
            [
                Event::Status(STATUS_INITIALIZING.into()),
                Event::Status(STATUS_READY.into())
            ]
        );
    }

    #[test]
    fn test_each_denomination_and_unknown_code() {
        let mut replies: Vec<Vec<u8>> = frames::DENOMINATIONS
            .iter()
            .map(|(code, _)| vec![0x02, 0x03, 0x06, 0x00, 0x81, *code])
            .collect();
        replies.insert(3, vec![0x02, 0x03, 0x06, 0x00, 0x81, 0x0F]);
        let connector = MockConnector::replying_to(&frames::POLL, replies);
        let (mut link, mut rx) = link_with(&connector, "MOCK");

        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| bills(e).len() == frames::DENOMINATIONS.len());
        thread::sleep(Duration::from_millis(30));
        link.stop();
        seen.extend(rx.drain());

        let expected: Vec<u32> = frames::DENOMINATIONS.iter().map(|(_, v)| *v).collect();
        assert_eq!(bills(&seen), expected);
        let acks = connector
            .writes()
            .iter()
            .filter(|w| w.as_slice() == frames::ACK)
            .count();
        assert_eq!(acks, expected.len());
    }

    #[test]
    fn test_stop_is_prompt_and_closes_once() {
        let connector = MockConnector::default();
        let (mut link, mut rx) = link_with(&connector, "MOCK");
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_READY));

        let began = Instant::now();
        link.stop();
        assert!(began.elapsed() < Duration::from_millis(500));
        assert_eq!(link.state(), SessionState::Stopped);
        assert_eq!(connector.lock().closes, 1);

        // A second stop is a no-op.
        link.stop();
        assert_eq!(connector.lock().closes, 1);
    }

    #[test]
    fn test_stop_interrupts_settle_delay() {
        let connector = MockConnector::default();
        let (tx, mut rx) = events::channel();
        let mut link = AcceptorLink::new(
            Arc::new(connector.clone()),
            SerialConfig::acceptor("MOCK"),
            tx,
        )
        .with_timing(AcceptorTiming {
            settle_delay: Duration::from_secs(30),
            ..fast_timing()
        });
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_INITIALIZING));

        let began = Instant::now();
        link.stop();
        assert!(began.elapsed() < Duration::from_secs(1));
        assert_eq!(link.state(), SessionState::Stopped);
        assert_eq!(connector.lock().closes, 1);
        assert!(!has_status(&rx.drain(), STATUS_READY));
    }

    #[test]
    fn test_reset_requires_polling() {
        let connector = MockConnector::default();
        let (mut link, _rx) = link_with(&connector, "MOCK");
        assert_eq!(link.state(), SessionState::Idle);
        assert!(matches!(link.reset(), Err(DeviceError::NotPolling)));
    }

    #[test]
    fn test_reset_sends_reset_and_ends_session() {
        let connector = MockConnector::default();
        let (mut link, mut rx) = link_with(&connector, "MOCK");
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_READY));

        link.reset().unwrap();
        seen.extend(rx.drain());

        assert_eq!(link.state(), SessionState::Stopped);
        assert_eq!(connector.writes().last().unwrap().as_slice(), frames::RESET);
        assert!(has_status(&seen, STATUS_REBOOTING));
        assert!(has_status(&seen, STATUS_REBOOTED));
        assert_eq!(connector.lock().closes, 1);
        assert!(matches!(link.reset(), Err(DeviceError::NotPolling)));
    }

    #[test]
    fn test_io_error_while_polling_faults() {
        let connector = MockConnector::default();
        let (mut link, mut rx) = link_with(&connector, "MOCK");
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_READY));

        connector.lock().fail_reads = true;
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_COMM_ERROR));
        link.stop();
        assert_eq!(link.state(), SessionState::Faulted);
        assert_eq!(connector.lock().closes, 1);
    }

    #[test]
    fn test_restart_replaces_session() {
        let connector = MockConnector::default();
        let (mut link, mut rx) = link_with(&connector, "MOCK");
        link.start().unwrap();
        let mut seen = Vec::new();
        wait_until(&mut rx, &mut seen, |e| has_status(e, STATUS_READY));

        link.start().unwrap();
        wait_until(&mut rx, &mut seen, |e| {
            e.iter().filter(|ev| matches!(ev, Event::Status(s) if s == STATUS_READY)).count() == 2
        });
        {
            let s = connector.lock();
            assert_eq!(s.opens, 2);
            assert_eq!(s.closes, 1);
        }
        drop(link);
        assert_eq!(connector.lock().closes, 2);
    }
}
