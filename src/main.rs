//! # Cash Kiosk console
//!
//! Operator tool for the kiosk peripherals.
//!
//! ## Usage
//!
//! ```bash
//! # Build information
//! cash-kiosk about
//!
//! # List serial ports
//! cash-kiosk ports
//!
//! # Print on the receipt printer
//! cash-kiosk --printer-port /dev/ttyUSB0 print-text "Спасибо за покупку"
//! cash-kiosk print-barcode 4006381333931 --symbology EAN13
//! cash-kiosk print-image logo.png
//! cash-kiosk cut
//!
//! # Accept bills until Ctrl-C
//! cash-kiosk --acceptor-port COM4 accept
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use cash_kiosk_lib::{
    diagnostics, list_ports, Event, HardwareManager, KioskConfig, PrintJob, SerialConnector,
};

/// Cash Kiosk - receipt printer and bill acceptor console
#[derive(Parser, Debug)]
#[command(name = "cash-kiosk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true, default_value = "kiosk.json")]
    config: PathBuf,

    /// Override the printer port from the settings file
    #[arg(long, global = true)]
    printer_port: Option<String>,

    /// Override the bill acceptor port from the settings file
    #[arg(long, global = true)]
    acceptor_port: Option<String>,

    /// Directory for rolling log files
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version and build information
    About,

    /// List available serial ports
    Ports,

    /// Print text (code page 866)
    PrintText { text: String },

    /// Print a barcode
    PrintBarcode {
        data: String,

        /// CODE39, CODE128 or EAN13
        #[arg(long, default_value = "CODE128")]
        symbology: String,
    },

    /// Print an image file, scaled to the paper width
    PrintImage { path: PathBuf },

    /// Cut the paper
    Cut,

    /// Accept bills and show the running total until Ctrl-C
    Accept {
        /// Hardware-reset the acceptor after this many seconds
        #[arg(long, value_name = "SECS")]
        reset_after: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(diagnostics::get_log_dir);
    let _guard = diagnostics::init_logging(&log_dir).context("failed to initialize logging")?;
    info!("Starting {}", diagnostics::about());

    let mut config = KioskConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.printer_port {
        config.printer.port = port;
    }
    if let Some(port) = cli.acceptor_port {
        config.acceptor.port = port;
    }

    match cli.command {
        Commands::About => {
            let about = diagnostics::about();
            println!("{}", serde_json::to_string_pretty(&about)?);
            Ok(())
        }
        Commands::Ports => {
            let ports = list_ports().context("failed to enumerate serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                match port.product {
                    Some(product) => println!("  {:<16} {:<10} {}", port.name, port.port_type, product),
                    None => println!("  {:<16} {}", port.name, port.port_type),
                }
            }
            Ok(())
        }
        Commands::PrintText { text } => print(&config, PrintJob::text(text)).await,
        Commands::PrintBarcode { data, symbology } => {
            if data.is_empty() {
                bail!("barcode data is empty");
            }
            print(&config, PrintJob::barcode(data, Some(&symbology))).await
        }
        Commands::PrintImage { path } => print(&config, PrintJob::Image { path }).await,
        Commands::Cut => print(&config, PrintJob::Cut).await,
        Commands::Accept { reset_after } => accept(&config, reset_after).await,
    }
}

async fn print(config: &KioskConfig, job: PrintJob) -> Result<()> {
    let manager = HardwareManager::new(Arc::new(SerialConnector), config);
    let handle = manager.submit(job)?;
    let id = handle.id();
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("print worker join failed")?
        .with_context(|| format!("print job {id} failed"))?;
    println!("Printed ({id})");
    Ok(())
}

async fn accept(config: &KioskConfig, reset_after: Option<u64>) -> Result<()> {
    let mut manager = HardwareManager::new(Arc::new(SerialConnector), config);
    manager.start_acceptor()?;

    let mut ticker = tokio::time::interval(config.drain_interval());
    let reset_at = reset_after.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut reset_done = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in manager.tick() {
                    match event {
                        Event::Status(text) => println!("[status] {text}"),
                        Event::Bill(bill) => println!(
                            "[bill]   {:>5}  at {}  total {}",
                            bill.value,
                            bill.timestamp.format("%H:%M:%S"),
                            manager.tally().total
                        ),
                    }
                }
                if !reset_done && reset_at.is_some_and(|at| tokio::time::Instant::now() >= at) {
                    reset_done = true;
                    if let Err(e) = off_runtime(|| manager.reset_acceptor()) {
                        warn!(error = %e, "Reset skipped");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }
        }
    }

    off_runtime(|| manager.shutdown());
    let tally = manager.tally();
    println!("Accepted {} bill(s), total {}", tally.bill_count, tally.total);
    Ok(())
}

/// Run a call that joins device threads without stalling other tasks on this
/// runtime worker.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(f)
}
