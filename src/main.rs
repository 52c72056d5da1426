use iptsd::config::Config;
use iptsd::daemon::Daemon;
use iptsd::device::{IptsDevice, Mode, BUFFER_SIZE};
use iptsd::sink::EvdevSink;

use clap::Parser;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// How many consecutive transport errors are tolerated before giving up.
const MAX_ERRORS: u32 = 50;

#[derive(Parser)]
#[command(name = "iptsd", about = "Userspace daemon for IPTS touchscreens")]
struct Cli {
    /// Path to the hidraw device node. Discovered automatically if omitted.
    device: Option<PathBuf>,

    /// Path to the config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let device = match &cli.device {
        Some(path) => IptsDevice::open(path, &config.device),
        None => IptsDevice::discover(&config.device),
    };

    let device = match device {
        Ok(device) => device,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "Connected to device {:04X}:{:04X}",
        device.vendor(),
        device.product()
    );

    // Physical dimensions and axis orientation come from the device
    // where available; the config file can still override them.
    if let Some(meta) = device.metadata() {
        log::info!(
            "Metadata: {}x{} antennas, {:.1}x{:.1} cm",
            meta.columns,
            meta.rows,
            meta.width,
            meta.height
        );

        config.apply_metadata(&meta);
    }

    if config.physical_diagonal().is_none() {
        log::warn!("Physical display dimensions are unknown; palm rejection is degraded.");
    }

    let sink = match EvdevSink::new(device.vendor(), device.product(), config.width, config.height)
    {
        Ok(sink) => sink,
        Err(e) => {
            log::error!("Failed to create virtual input devices: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut daemon = Daemon::new(&config, sink);

    // Stop flag, flipped by the signal handler and observed between
    // frames. A frame is never cancelled halfway.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down...");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    // Touch data only flows in multitouch mode.
    if let Err(e) = device.set_mode(Mode::Multitouch) {
        log::error!("Failed to enable multitouch mode: {e:#}");
        return ExitCode::FAILURE;
    }

    let failed = run_ingest_loop(&device, &mut daemon, &stop).await;

    // Hand the device back to the firmware's singletouch fallback.
    if let Err(e) = device.set_mode(Mode::Singletouch) {
        log::warn!("Failed to disable multitouch mode: {e:#}");
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Reads reports and drives the pipeline until stopped.
///
/// Transport errors back off for 100 ms and count against a budget;
/// parse errors only skip the affected report. Returns whether the loop
/// ended because the error budget was exhausted.
async fn run_ingest_loop(
    device: &IptsDevice,
    daemon: &mut Daemon<EvdevSink>,
    stop: &AtomicBool,
) -> bool {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut errors = 0u32;

    while !stop.load(Ordering::Relaxed) {
        if errors >= MAX_ERRORS {
            log::error!("Encountered {MAX_ERRORS} continuous errors, aborting...");
            return true;
        }

        match device.read(&mut buf) {
            Ok(0) => {
                // No data available; yield and retry.
                sleep(Duration::from_millis(4)).await;
            }
            Ok(size) => {
                errors = 0;

                // Unparseable reports are expected on shared interfaces
                // (e.g. singletouch fallback data); skip them quietly.
                if let Err(e) = daemon.process(&buf[..size]) {
                    log::debug!("Skipping unparseable report ({size} bytes): {e}");
                }
            }
            Err(e) => {
                errors += 1;
                log::warn!("{e:#}");

                // Let the device settle before trying again.
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    false
}
