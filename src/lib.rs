//! Cash Kiosk - device layer
//!
//! Drives the two serial peripherals of a self-service cash kiosk: an ESC/POS
//! thermal receipt printer and a CCNET-style bill acceptor. Device workers run
//! on their own threads and report to a single consumer through an event
//! channel; [`HardwareManager`] bundles everything for the presentation layer.

pub mod acceptor;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod escpos;
pub mod events;
pub mod hardware_manager;
pub mod jobs;
pub mod printer;
pub mod raster;
pub mod transport;

pub use acceptor::{AcceptorLink, AcceptorTiming, ResponseLayout, SessionState};
pub use config::{KioskConfig, SerialConfig};
pub use error::DeviceError;
pub use events::{BillEvent, Event, EventReceiver, EventSender, Tally};
pub use hardware_manager::{HardwareManager, HardwareStatus};
pub use jobs::{JobExecutor, JobHandle, PrintJob};
pub use printer::PrinterLink;
pub use raster::{ImageRasterizer, RasterImage};
pub use transport::{list_ports, Connect, PortInfo, SerialConnector, Transport};
