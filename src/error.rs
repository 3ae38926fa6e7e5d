//! Error taxonomy for the kiosk device layer.
//!
//! Every fallible operation in the library returns [`DeviceError`]. Only
//! `FaultedSession` and `Connection` carry a live I/O cause; the rest describe
//! a rejected request or a bad input.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Port open failed, or a write on a live handle failed.
    #[error("Connection error on {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Image could not be decoded or converted.
    #[error("Image processing failed: {0}")]
    ImageProcessing(#[from] image::ImageError),

    /// Bitmap does not fit the 16-bit fields of the raster header.
    #[error("Image of {width}x{height} dots cannot be sent as a raster bitmap")]
    ImageDimensions { width: u32, height: u32 },

    /// No acceptor response inside the poll window. Means "no bill present".
    #[error("No response within {window:?}")]
    ProtocolTimeout { window: Duration },

    /// A printer job is already in flight.
    #[error("Printer is busy with another job")]
    Busy,

    /// Unrecoverable acceptor I/O error; the session has ended.
    #[error("Acceptor session on {port} faulted: {source}")]
    FaultedSession {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid barcode: {0}")]
    InvalidBarcode(String),

    /// `reset()` was requested while no session was polling.
    #[error("Bill acceptor is not running")]
    NotPolling,

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeviceError {
    /// Whether the error ends the operation that produced it.
    ///
    /// A poll timeout is the normal "nothing inserted" outcome.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeviceError::ProtocolTimeout { .. })
    }

    pub(crate) fn connection(port: &str, source: std::io::Error) -> Self {
        DeviceError::Connection {
            port: port.to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
