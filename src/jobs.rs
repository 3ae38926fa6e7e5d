//! Printer job execution.
//!
//! Key design goals:
//! - At most one printer job in flight; a second submission is rejected with
//!   [`DeviceError::Busy`], never queued.
//! - Each job opens its own [`PrinterLink`] on a worker thread and releases it
//!   on every exit path, panics included.
//! - Failures reach the caller through [`JobHandle::join`] and the operator
//!   through a Status event.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SerialConfig;
use crate::error::DeviceError;
use crate::escpos::CodePage;
use crate::events::EventSender;
use crate::printer::PrinterLink;
use crate::raster::ImageRasterizer;
use crate::transport::Connect;

/// Lines fed after every job so the output clears the tear bar.
const TRAILING_FEED: usize = 2;

pub const DEFAULT_SYMBOLOGY: &str = "CODE128";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrintJob {
    /// Cyrillic-capable text, printed in code page 866.
    Text { text: String },
    Barcode { data: String, symbology: String },
    Image { path: PathBuf },
    ImageBytes {
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Cut,
}

impl PrintJob {
    pub fn text(text: impl Into<String>) -> Self {
        PrintJob::Text { text: text.into() }
    }

    /// Barcode with the default symbology when `symbology` is `None`.
    pub fn barcode(data: impl Into<String>, symbology: Option<&str>) -> Self {
        PrintJob::Barcode {
            data: data.into(),
            symbology: symbology.unwrap_or(DEFAULT_SYMBOLOGY).to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PrintJob::Text { .. } => "text",
            PrintJob::Barcode { .. } => "barcode",
            PrintJob::Image { .. } => "image",
            PrintJob::ImageBytes { .. } => "image_bytes",
            PrintJob::Cut => "cut",
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct JobExecutor {
    connector: Arc<dyn Connect>,
    printer: SerialConfig,
    rasterizer: ImageRasterizer,
    events: EventSender,
    busy: Arc<AtomicBool>,
}

/// Clears the busy flag when the worker ends, however it ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobExecutor {
    pub fn new(
        connector: Arc<dyn Connect>,
        printer: SerialConfig,
        rasterizer: ImageRasterizer,
        events: EventSender,
    ) -> Self {
        Self {
            connector,
            printer,
            rasterizer,
            events,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start `job` on a worker thread, or fail with `Busy`.
    pub fn submit(&self, job: PrintJob) -> Result<JobHandle, DeviceError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(kind = job.kind(), "Printer busy, job rejected");
            return Err(DeviceError::Busy);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let id = Uuid::new_v4();
        let worker = JobWorker {
            id,
            connector: Arc::clone(&self.connector),
            printer: self.printer.clone(),
            rasterizer: self.rasterizer,
            events: self.events.clone(),
        };
        info!(job_id = %id, kind = job.kind(), port = %self.printer.path, "Print job submitted");

        let handle = thread::Builder::new()
            .name(format!("print-{id}"))
            .spawn(move || {
                let _guard = guard;
                worker.run(job)
            })
            .map_err(|e| DeviceError::connection(&self.printer.path, e))?;

        Ok(JobHandle { id, handle })
    }

    /// Wait until no job is in flight. `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }
}

pub struct JobHandle {
    id: Uuid,
    handle: JoinHandle<Result<(), DeviceError>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Block until the job ends and return its outcome.
    pub fn join(self) -> Result<(), DeviceError> {
        self.handle.join().map_err(|_| DeviceError::WorkerPanicked)?
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct JobWorker {
    id: Uuid,
    connector: Arc<dyn Connect>,
    printer: SerialConfig,
    rasterizer: ImageRasterizer,
    events: EventSender,
}

impl JobWorker {
    fn run(self, job: PrintJob) -> Result<(), DeviceError> {
        let started = Instant::now();
        let result = self.execute(&job);
        match &result {
            Ok(()) => info!(
                job_id = %self.id,
                kind = job.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Print job completed"
            ),
            Err(e) => {
                warn!(job_id = %self.id, kind = job.kind(), error = %e, "Print job failed");
                self.events.status(format!("Printer error: {e}"));
            }
        }
        result
    }

    fn execute(&self, job: &PrintJob) -> Result<(), DeviceError> {
        let mut link = PrinterLink::open(self.connector.as_ref(), &self.printer)?;
        let outcome = self.run_sequence(&mut link, job);
        // Feed even after a failure; a dead link makes this a no-op.
        let fed = link.feed(TRAILING_FEED);
        link.close();
        outcome.and(fed)
    }

    fn run_sequence(&self, link: &mut PrinterLink, job: &PrintJob) -> Result<(), DeviceError> {
        link.initialize()?;
        match job {
            PrintJob::Text { text } => {
                link.set_code_page(CodePage::Pc866)?;
                link.text(text, CodePage::Pc866)
            }
            PrintJob::Barcode { data, symbology } => {
                link.set_code_page(CodePage::Pc437)?;
                link.print_barcode(data, symbology)
            }
            PrintJob::Image { path } => {
                link.set_code_page(CodePage::Pc437)?;
                let image = self.rasterizer.rasterize_file(path)?;
                link.print_image(image)
            }
            PrintJob::ImageBytes { bytes } => {
                link.set_code_page(CodePage::Pc437)?;
                let image = self.rasterizer.rasterize_bytes(bytes)?;
                link.print_image(image)
            }
            PrintJob::Cut => {
                link.set_code_page(CodePage::Pc437)?;
                link.cut()
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
