//! Byte-level transport for the kiosk peripherals.
//!
//! Protocol code (printer commands, acceptor polling) talks to a [`Transport`]
//! and never to `serialport` directly. A [`Connect`] implementation opens
//! transports from a [`SerialConfig`]; the production one is
//! [`SerialConnector`].

use serde::Serialize;
use std::io::{self, Read, Write};
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::error::DeviceError;

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// An open, exclusively owned byte link to one device.
///
/// Dropping the transport closes the underlying handle.
pub trait Transport: Send {
    /// Write all bytes and flush.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Number of inbound bytes waiting to be read.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes. Times out with `ErrorKind::TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard any inbound bytes not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Human-readable description of the connection target.
    fn description(&self) -> String;
}

/// Opens transports. Shared between the caller thread and device workers.
pub trait Connect: Send + Sync {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Transport>, DeviceError>;
}

// ---------------------------------------------------------------------------
// Serial transport
// ---------------------------------------------------------------------------

/// Serial (COM / RS-232 / USB-serial) transport using the `serialport` crate.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Box<dyn serialport::SerialPort>,
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        debug!("Serial TX {} ({} bytes): {:02X?}", self.port_name, data.len(), data);
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.port.read(buf)?;
        debug!("Serial RX {} ({n} bytes): {:02X?}", self.port_name, &buf[..n]);
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn description(&self) -> String {
        format!("Serial({}@{})", self.port_name, self.baud_rate)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        info!(port = %self.port_name, "Serial port closed");
    }
}

/// Opens real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connect for SerialConnector {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Transport>, DeviceError> {
        info!(
            "Opening serial port {} @ {} baud",
            config.path, config.baud_rate
        );

        let mut port = serialport::new(&config.path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|e| DeviceError::connection(&config.path, e.into()))?;

        if config.assert_control_lines {
            port.write_data_terminal_ready(true)
                .map_err(|e| DeviceError::connection(&config.path, e.into()))?;
            port.write_request_to_send(true)
                .map_err(|e| DeviceError::connection(&config.path, e.into()))?;
        }

        info!(port = %config.path, baud = config.baud_rate, "Serial port opened");
        Ok(Box::new(SerialTransport {
            port_name: config.path.clone(),
            baud_rate: config.baud_rate,
            port,
        }))
    }
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub name: String,
    pub port_type: &'static str,
    pub product: Option<String>,
}

/// List available serial/COM ports on this system.
pub fn list_ports() -> Result<Vec<PortInfo>, DeviceError> {
    let ports = serialport::available_ports()
        .map_err(|e| DeviceError::connection("(enumeration)", e.into()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (port_type, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(usb) => ("usb", usb.product),
                serialport::SerialPortType::BluetoothPort => ("bluetooth", None),
                serialport::SerialPortType::PciPort => ("pci", None),
                serialport::SerialPortType::Unknown => ("unknown", None),
            };
            PortInfo {
                name: p.port_name,
                port_type,
                product,
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// In-memory transport for tests
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
