//! Replays captured touch data through the processing pipeline.
//!
//! The input file is a flat sequence of records, each a little-endian u32
//! length followed by the raw report bytes. Events come out through a
//! logging sink instead of virtual devices, which makes the tool usable
//! for protocol debugging on machines without the hardware (or without
//! permission to create uinput devices).

use iptsd::config::Config;
use iptsd::daemon::Daemon;
use iptsd::parser::Stylus;
use iptsd::sink::{InputSink, SinkError};

use clap::Parser;

use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ipts-replay", about = "Replay captured IPTS touch data")]
struct Cli {
    /// The capture file to replay.
    file: PathBuf,

    /// Path to the config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Size of the per-report header in the captured data.
    #[arg(long, default_value_t = 3)]
    header_size: usize,
}

/// Counts events and logs them at debug level.
#[derive(Default)]
struct LogSink {
    contacts: u64,
    lifts: u64,
    styli: u64,
    stylus_lifts: u64,
    buttons: u64,
    frames: u64,
}

impl InputSink for LogSink {
    fn emit_contact(
        &mut self,
        index: usize,
        x: f64,
        y: f64,
        major: f64,
        minor: f64,
        orientation: f64,
        stable: bool,
    ) -> Result<(), SinkError> {
        self.contacts += 1;
        log::debug!(
            "contact {index}: x={x:.4} y={y:.4} major={major:.4} minor={minor:.4} \
             orientation={orientation:.4} stable={stable}"
        );
        Ok(())
    }

    fn emit_contact_lift(&mut self, index: usize) -> Result<(), SinkError> {
        self.lifts += 1;
        log::debug!("contact {index}: lift");
        Ok(())
    }

    fn emit_stylus(&mut self, stylus: &Stylus) -> Result<(), SinkError> {
        self.styli += 1;
        log::debug!(
            "stylus {:08X}: x={:.4} y={:.4} pressure={:.4} contact={} button={} rubber={}",
            stylus.serial,
            stylus.x,
            stylus.y,
            stylus.pressure,
            stylus.contact,
            stylus.button,
            stylus.rubber
        );
        Ok(())
    }

    fn emit_stylus_lift(&mut self) -> Result<(), SinkError> {
        self.stylus_lifts += 1;
        log::debug!("stylus: lift");
        Ok(())
    }

    fn emit_button(&mut self, active: bool, pressure: f64) -> Result<(), SinkError> {
        self.buttons += 1;
        log::debug!("button: active={active} pressure={pressure:.4}");
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        self.frames += 1;
        Ok(())
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let data = match std::fs::read(&cli.file) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Failed to read {}: {e}", cli.file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut daemon = Daemon::new(&config, LogSink::default());

    let mut offset = 0;
    let mut records = 0u64;

    // Walk the length-prefixed records. A truncated record at the end of
    // the file is the normal end of a capture that was cut off mid-write.
    loop {
        let Some(header) = data.get(offset..offset + 4) else {
            break;
        };

        let size = u32::from_le_bytes(header.try_into().unwrap()) as usize;
        offset += 4;

        let Some(record) = data.get(offset..offset + size) else {
            log::info!("Capture ends with a truncated record; stopping.");
            break;
        };

        offset += size;
        records += 1;

        if let Err(e) = daemon.process_with_header(record, cli.header_size) {
            log::debug!("Skipping unparseable record {records}: {e}");
        }
    }

    let sink = daemon.sink();
    log::info!(
        "Replayed {records} records: {} frames, {} contact events, {} lifts, \
         {} stylus events, {} stylus lifts, {} button events",
        sink.frames,
        sink.contacts,
        sink.lifts,
        sink.styli,
        sink.stylus_lifts,
        sink.buttons
    );

    ExitCode::SUCCESS
}
