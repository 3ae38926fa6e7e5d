//! Kiosk configuration.
//!
//! Settings live in a JSON file whose sections mirror the two peripherals.
//! Every field has a default, so a partial (or missing) file still yields a
//! working configuration:
//!
//! ```json
//! {
//!   "printer":  { "port": "COM3", "max_image_width": 576 },
//!   "acceptor": { "port": "COM4", "settle_delay_ms": 2000 },
//!   "drain_interval_ms": 100
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::acceptor::{AcceptorTiming, ResponseLayout};
use crate::error::DeviceError;
use crate::raster::ImageRasterizer;

// ---------------------------------------------------------------------------
// Serial connection parameters
// ---------------------------------------------------------------------------

/// Parameters of one serial connection. Immutable once a link is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    /// Raise DTR and RTS right after the port opens.
    pub assert_control_lines: bool,
    pub timeout: Duration,
}

impl SerialConfig {
    /// Receipt printer line: 19200 8N1, control lines asserted, 1 s timeout.
    pub fn printer(path: &str) -> Self {
        Self {
            path: path.to_string(),
            baud_rate: 19_200,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            assert_control_lines: true,
            timeout: Duration::from_secs(1),
        }
    }

    /// Bill acceptor line: 9600 8N1, 100 ms timeout.
    pub fn acceptor(path: &str) -> Self {
        Self {
            path: path.to_string(),
            baud_rate: 9_600,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            assert_control_lines: false,
            timeout: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// File-backed settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrinterSettings {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub max_image_width: u32,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            port: "COM3".to_string(),
            baud_rate: 19_200,
            timeout_ms: 1_000,
            max_image_width: 576,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcceptorSettings {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub enable_delay_ms: u64,
    pub poll_window_ms: u64,
    pub ack_delay_ms: u64,
    pub reset_delay_ms: u64,
    /// Offset of the command-type byte in a poll response.
    pub status_offset: usize,
    /// Offset of the denomination code in a poll response.
    pub denomination_offset: usize,
}

impl Default for AcceptorSettings {
    fn default() -> Self {
        let timing = AcceptorTiming::default();
        let layout = ResponseLayout::default();
        Self {
            port: "COM4".to_string(),
            baud_rate: 9_600,
            timeout_ms: 100,
            settle_delay_ms: timing.settle_delay.as_millis() as u64,
            enable_delay_ms: timing.enable_delay.as_millis() as u64,
            poll_window_ms: timing.poll_window.as_millis() as u64,
            ack_delay_ms: timing.ack_delay.as_millis() as u64,
            reset_delay_ms: timing.reset_delay.as_millis() as u64,
            status_offset: layout.status_offset,
            denomination_offset: layout.denomination_offset,
        }
    }
}

/// Whole-kiosk settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KioskConfig {
    pub printer: PrinterSettings,
    pub acceptor: AcceptorSettings,
    /// Period of the event-drain tick.
    pub drain_interval_ms: u64,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            printer: PrinterSettings::default(),
            acceptor: AcceptorSettings::default(),
            drain_interval_ms: 100,
        }
    }
}

impl KioskConfig {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DeviceError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DeviceError> {
        serde_json::from_str(raw).map_err(|e| DeviceError::Config(e.to_string()))
    }

    pub fn printer_serial(&self) -> SerialConfig {
        let mut cfg = SerialConfig::printer(&self.printer.port);
        cfg.baud_rate = self.printer.baud_rate;
        cfg.timeout = Duration::from_millis(self.printer.timeout_ms);
        cfg
    }

    pub fn acceptor_serial(&self) -> SerialConfig {
        let mut cfg = SerialConfig::acceptor(&self.acceptor.port);
        cfg.baud_rate = self.acceptor.baud_rate;
        cfg.timeout = Duration::from_millis(self.acceptor.timeout_ms);
        cfg
    }

    pub fn acceptor_timing(&self) -> AcceptorTiming {
        let a = &self.acceptor;
        AcceptorTiming {
            settle_delay: Duration::from_millis(a.settle_delay_ms),
            enable_delay: Duration::from_millis(a.enable_delay_ms),
            poll_window: Duration::from_millis(a.poll_window_ms),
            ack_delay: Duration::from_millis(a.ack_delay_ms),
            reset_delay: Duration::from_millis(a.reset_delay_ms),
        }
    }

    pub fn response_layout(&self) -> ResponseLayout {
        ResponseLayout {
            status_offset: self.acceptor.status_offset,
            denomination_offset: self.acceptor.denomination_offset,
        }
    }

    pub fn rasterizer(&self) -> ImageRasterizer {
        ImageRasterizer::new(self.printer.max_image_width)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_parameters() {
        let cfg = KioskConfig::default();
        let printer = cfg.printer_serial();
        assert_eq!(printer.path, "COM3");
        assert_eq!(printer.baud_rate, 19_200);
        assert_eq!(printer.timeout, Duration::from_secs(1));
        assert!(printer.assert_control_lines);

        let acceptor = cfg.acceptor_serial();
        assert_eq!(acceptor.path, "COM4");
        assert_eq!(acceptor.baud_rate, 9_600);
        assert_eq!(acceptor.timeout, Duration::from_millis(100));

        let timing = cfg.acceptor_timing();
        assert_eq!(timing.settle_delay, Duration::from_secs(2));
        assert_eq!(timing.poll_window, Duration::from_millis(100));
        assert_eq!(cfg.drain_interval(), Duration::from_millis(100));
        assert_eq!(cfg.rasterizer().max_width(), 576);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = KioskConfig::from_json(
            r#"{ "printer": { "port": "/dev/ttyUSB0" }, "acceptor": { "settle_delay_ms": 500 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.printer.port, "/dev/ttyUSB0");
        assert_eq!(cfg.printer.baud_rate, 19_200);
        assert_eq!(cfg.acceptor.port, "COM4");
        assert_eq!(cfg.acceptor_timing().settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = KioskConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = KioskConfig::load(Path::new("/nonexistent/kiosk.json")).unwrap();
        assert_eq!(cfg, KioskConfig::default());
    }
}
