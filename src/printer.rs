//! Receipt printer link.
//!
//! [`PrinterLink`] owns the serial handle to the printer and turns each
//! command primitive into one write of the exact ESC/POS bytes built by
//! [`crate::escpos`].
//!
//! Writes on a link that is no longer connected (closed, or dropped after a
//! failed write) are silently discarded and report success. Callers that
//! care check [`PrinterLink::is_connected`].

use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::DeviceError;
use crate::escpos::{Alignment, BarcodeSpec, CodePage, EscPosBuilder, Symbology};
use crate::raster::RasterImage;
use crate::transport::{Connect, Transport};

pub struct PrinterLink {
    port_name: String,
    port: Option<Box<dyn Transport>>,
}

impl PrinterLink {
    /// Open the printer port. Fails with `DeviceError::Connection`.
    pub fn open(connector: &dyn Connect, config: &SerialConfig) -> Result<Self, DeviceError> {
        let port = connector.open(config)?;
        info!(printer = %port.description(), "Printer link opened");
        Ok(Self {
            port_name: config.path.clone(),
            port: Some(port),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.port_name, "Printer link closed");
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let Some(port) = self.port.as_mut() else {
            debug!(port = %self.port_name, bytes = data.len(), "Printer not connected, write dropped");
            return Ok(());
        };
        if let Err(e) = port.write_all(data) {
            warn!(port = %self.port_name, error = %e, "Printer write failed, dropping handle");
            self.port = None;
            return Err(DeviceError::connection(&self.port_name, e));
        }
        Ok(())
    }

    fn send(&mut self, build: impl FnOnce(&mut EscPosBuilder)) -> Result<(), DeviceError> {
        let mut builder = EscPosBuilder::new();
        build(&mut builder);
        self.write(&builder.build())
    }

    // -----------------------------------------------------------------------
    // Command primitives
    // -----------------------------------------------------------------------

    pub fn initialize(&mut self) -> Result<(), DeviceError> {
        self.send(|b| {
            b.init();
        })
    }

    pub fn set_code_page(&mut self, page: CodePage) -> Result<(), DeviceError> {
        self.send(|b| {
            b.code_page(page);
        })
    }

    /// Write `text` encoded for `page`. Select the same page first.
    pub fn text(&mut self, text: &str, page: CodePage) -> Result<(), DeviceError> {
        self.send(|b| {
            b.text(text, page);
        })
    }

    pub fn feed(&mut self, lines: usize) -> Result<(), DeviceError> {
        self.send(|b| {
            b.feed(lines);
        })
    }

    pub fn set_alignment(&mut self, alignment: Alignment) -> Result<(), DeviceError> {
        self.send(|b| {
            b.align(alignment);
        })
    }

    pub fn cut(&mut self) -> Result<(), DeviceError> {
        self.send(|b| {
            b.cut();
        })
    }

    /// Print a barcode named by its operator tag (`CODE39`, `CODE128`,
    /// `EAN13`).
    ///
    /// An unknown tag writes nothing and returns `Ok`. A payload that is not
    /// ASCII or exceeds 255 bytes is rejected before anything is written.
    pub fn print_barcode(&mut self, data: &str, symbology: &str) -> Result<(), DeviceError> {
        let Some(symbology) = Symbology::from_tag(symbology) else {
            warn!(symbology, "Unsupported barcode symbology, nothing printed");
            return Ok(());
        };
        let spec = BarcodeSpec::new(symbology, data)?;
        self.print_barcode_spec(&spec)
    }

    pub fn print_barcode_spec(&mut self, spec: &BarcodeSpec) -> Result<(), DeviceError> {
        self.send(|b| {
            b.barcode(spec);
        })
    }

    /// Center, send the raster bitmap, feed one line.
    pub fn print_image(&mut self, image: RasterImage) -> Result<(), DeviceError> {
        // Rasterizer output always fits; hand-built bitmaps may not.
        let width_bytes = u16::try_from(image.width_bytes());
        let height = u16::try_from(image.height());
        let (Ok(width_bytes), Ok(height)) = (width_bytes, height) else {
            return Err(DeviceError::ImageDimensions {
                width: image.width(),
                height: image.height(),
            });
        };
        self.set_alignment(Alignment::Center)?;
        self.send(|b| {
            b.raster_image(width_bytes, height, image.data());
        })?;
        self.feed(1)
    }
}

impl Drop for PrinterLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;

    fn open_mock() -> (MockConnector, PrinterLink) {
        let connector = MockConnector::default();
        let link = PrinterLink::open(&connector, &SerialConfig::printer("MOCK")).unwrap();
        (connector, link)
    }

    #[test]
    fn test_primitives_write_exact_bytes() {
        let (connector, mut link) = open_mock();
        link.initialize().unwrap();
        link.set_code_page(CodePage::Pc866).unwrap();
        link.text("Да", CodePage::Pc866).unwrap();
        link.feed(2).unwrap();
        link.set_alignment(Alignment::Right).unwrap();
        link.cut().unwrap();

        assert_eq!(
            connector.writes(),
            vec![
                vec![0x1B, 0x40],
                vec![0x1B, 0x74, 17],
                vec![0x84, 0xA0],
                vec![0x0A, 0x0A],
                vec![0x1B, 0x61, 2],
                vec![0x1D, 0x56, 0x00],
            ]
        );
    }

    #[test]
    fn test_unsupported_symbology_writes_nothing() {
        let (connector, mut link) = open_mock();
        link.print_barcode("1234567890", "UPC-A").unwrap();
        assert!(connector.written_bytes().is_empty());
    }

    #[test]
    fn test_supported_symbologies_write_type_code() {
        for (tag, code) in [("CODE39", 69u8), ("CODE128", 73), ("EAN13", 67)] {
            let (connector, mut link) = open_mock();
            link.print_barcode("4006381333931", tag).unwrap();
            let bytes = connector.written_bytes();
            assert_eq!(&bytes[..6], &[0x1D, 0x68, 0x50, 0x1D, 0x48, 0x02]);
            assert_eq!(&bytes[6..10], &[0x1D, 0x6B, code, 13]);
            assert_eq!(&bytes[10..], b"4006381333931");
        }
    }

    #[test]
    fn test_oversized_barcode_writes_nothing() {
        let (connector, mut link) = open_mock();
        let err = link.print_barcode(&"9".repeat(300), "CODE128").unwrap_err();
        assert!(matches!(err, DeviceError::InvalidBarcode(_)));
        assert!(connector.written_bytes().is_empty());
    }

    #[test]
    fn test_print_image_frames_bitmap() {
        let (connector, mut link) = open_mock();
        let image = RasterImage::from_packed(10, 2, vec![0xFF, 0xC0, 0x80, 0x00]).unwrap();
        link.print_image(image).unwrap();
        assert_eq!(
            connector.written_bytes(),
            vec![
                0x1B, 0x61, 0x01, // center
                0x1D, 0x76, 0x30, 0x00, 0x02, 0x00, 0x02, 0x00, // header
                0xFF, 0xC0, 0x80, 0x00, // bitmap
                0x0A,
            ]
        );
    }

    #[test]
    fn test_oversized_bitmap_writes_nothing() {
        let (connector, mut link) = open_mock();
        // 70000 bytes per row does not fit the 16-bit width field.
        let image = RasterImage::from_packed(70_000 * 8, 1, vec![0; 70_000]).unwrap();
        let err = link.print_image(image).unwrap_err();
        assert!(matches!(err, DeviceError::ImageDimensions { height: 1, .. }));
        assert!(connector.written_bytes().is_empty());
        assert!(link.is_connected());
    }

    #[test]
    fn test_write_after_close_is_silently_dropped() {
        let (connector, mut link) = open_mock();
        link.close();
        assert!(!link.is_connected());
        link.initialize().unwrap();
        link.text("lost", CodePage::Pc437).unwrap();
        link.cut().unwrap();
        assert!(connector.written_bytes().is_empty());
        assert_eq!(connector.lock().closes, 1);
    }

    #[test]
    fn test_failed_write_reports_then_drops_handle() {
        let (connector, mut link) = open_mock();
        connector.lock().fail_writes_after = Some(1);
        link.initialize().unwrap();
        let err = link.cut().unwrap_err();
        assert!(matches!(err, DeviceError::Connection { .. }));
        assert!(!link.is_connected());
        // Best-effort no-op from here on.
        link.feed(2).unwrap();
        assert_eq!(connector.writes(), vec![vec![0x1B, 0x40]]);
    }

    #[test]
    fn test_open_failure_is_connection_error() {
        let connector = MockConnector::default();
        connector.lock().fail_open = true;
        let err = PrinterLink::open(&connector, &SerialConfig::printer("COM3")).err().unwrap();
        assert!(err.to_string().contains("COM3"));
    }

    #[test]
    fn test_drop_closes_once() {
        let (connector, mut link) = open_mock();
        link.close();
        drop(link);
        assert_eq!(connector.lock().closes, 1);
    }
}
