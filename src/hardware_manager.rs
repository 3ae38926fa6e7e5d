//! Hardware manager: peripheral orchestrator for the kiosk.
//!
//! Single owner of the printer executor, the acceptor session and the event
//! consumer side. The presentation layer talks to this type only.
//!
//! Responsibilities:
//! - Start, reset and stop the bill acceptor session
//! - Hand print jobs to the executor
//! - Drain events on the caller's tick and keep the running tally
//! - Aggregate status: a single snapshot of both peripherals
//! - Graceful shutdown: end the session and let an in-flight job finish

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::acceptor::{AcceptorLink, SessionState};
use crate::config::KioskConfig;
use crate::error::DeviceError;
use crate::events::{self, Event, EventReceiver, Tally};
use crate::jobs::{JobExecutor, JobHandle, PrintJob};
use crate::transport::Connect;

/// How long `shutdown` waits for an in-flight print job.
const SHUTDOWN_JOB_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    pub acceptor_port: String,
    pub acceptor: SessionState,
    pub printer_busy: bool,
    pub tally: Tally,
}

pub struct HardwareManager {
    printer: JobExecutor,
    acceptor: AcceptorLink,
    events: EventReceiver,
    tally: Tally,
}

impl HardwareManager {
    pub fn new(connector: Arc<dyn Connect>, config: &KioskConfig) -> Self {
        let (tx, rx) = events::channel();
        let printer = JobExecutor::new(
            Arc::clone(&connector),
            config.printer_serial(),
            config.rasterizer(),
            tx.clone(),
        );
        let acceptor = AcceptorLink::new(connector, config.acceptor_serial(), tx)
            .with_timing(config.acceptor_timing())
            .with_layout(config.response_layout());
        Self {
            printer,
            acceptor,
            events: rx,
            tally: Tally::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Acceptor
    // -----------------------------------------------------------------------

    /// Start a fresh session with an empty tally.
    pub fn start_acceptor(&mut self) -> Result<(), DeviceError> {
        self.acceptor.stop();
        // Queued events stay queued; the next tick delivers them.
        self.tally.clear();
        info!(port = %self.acceptor.port(), "Starting bill acceptor");
        self.acceptor.start()
    }

    pub fn reset_acceptor(&mut self) -> Result<(), DeviceError> {
        info!(port = %self.acceptor.port(), "Resetting bill acceptor");
        self.acceptor.reset()
    }

    pub fn stop_acceptor(&mut self) {
        self.acceptor.stop();
    }

    // -----------------------------------------------------------------------
    // Printer
    // -----------------------------------------------------------------------

    pub fn submit(&self, job: PrintJob) -> Result<JobHandle, DeviceError> {
        self.printer.submit(job)
    }

    // -----------------------------------------------------------------------
    // Events and status
    // -----------------------------------------------------------------------

    /// Drain every queued event into the tally and return them in order.
    pub fn tick(&mut self) -> Vec<Event> {
        let drained = self.events.drain();
        self.tally.apply_all(&drained);
        drained
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn status(&self) -> HardwareStatus {
        HardwareStatus {
            acceptor_port: self.acceptor.port().to_string(),
            acceptor: self.acceptor.state(),
            printer_busy: self.printer.is_busy(),
            tally: self.tally.clone(),
        }
    }

    /// Stop the acceptor and wait for an in-flight print job.
    pub fn shutdown(&mut self) {
        info!("Hardware manager: shutting down all peripherals");
        self.acceptor.stop();
        if !self.printer.wait_idle(SHUTDOWN_JOB_WAIT) {
            warn!("Print job still running at shutdown");
        }
        self.tick();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
