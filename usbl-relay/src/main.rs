use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use usbl_relay_lib::Controller;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

/// Cerulean USBL Relay: listen for GPS absolute position data of a base
/// station and relative position data from that base station to a
/// transponder. Relay the GPS data unchanged to an echo receiver and compute
/// the absolute position of the transponder for a MAVLink-style consumer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port of the GPS device.
    #[arg(short, long)]
    gps: String,

    /// Port of the USBL device.
    #[arg(short, long)]
    usbl: String,

    /// UDP address to pass GPS data through, host:port.
    #[arg(short, long)]
    echo: Option<String>,

    /// UDP address to send the synthesized transponder position to, host:port.
    #[arg(short, long)]
    mav: Option<String>,

    /// How verbose should we be?
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    log: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log.into())
        .init();

    info!("Starting usbl-relay");
    info!("GPS device: {}", args.gps);
    info!("USBL device: {}", args.usbl);

    let mut controller = Controller::new()?;
    controller.set_change_callback(Box::new(|key, value| {
        info!("{key} = {value:?}");
    }));

    if let Err(e) = controller.set_addr_echo(args.echo.as_deref()) {
        error!("invalid --echo address: {e}");
        return Err(Box::new(e));
    }
    if let Err(e) = controller.set_addr_mav(args.mav.as_deref()) {
        error!("invalid --mav address: {e}");
        return Err(Box::new(e));
    }
    controller.set_dev_gps(Some(&args.gps));
    controller.set_dev_usbl(Some(&args.usbl));

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || running_handler.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("shutting down");
    controller.shutdown();
    Ok(())
}
