//! trackerd — GPS track recorder firmware daemon.
//!
//! Thin binary: parses CLI args, initializes logging, wires the HAL
//! (a real serial UART when `--port` is given, or a canned-sentence mock
//! UART for bring-up/demo runs), and hands off to `tracker_loop::run`.
//!
//! The storage medium, GPIO, and wall clock are wired to
//! `tracker_hal::mock` here rather than a real backend: a FAT driver,
//! sysfs GPIO, and a monotonic clock source are board-support concerns
//! external to this firmware core (`spec.md` §1/§6), supplied by whatever
//! board package embeds these crates on real hardware. This binary exists
//! to exercise the core end to end on a host machine.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracker_hal::mock::{MockClock, MockFilesystem, MockGpio, MockUart};
use tracker_hal::serial::SerialUart;
use tracker_hal::{HalError, Uart};
use tracker_loop::{LoopReport, StopReason};
use tracker_power::PowerSignal;
use tracker_storage::StorageEngine;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "trackerd", about = "GPS track recorder firmware daemon")]
struct Args {
    /// Serial device to read NMEA sentences from (e.g. "/dev/ttyUSB0"). If
    /// omitted, runs against a mock UART fed by `--replay-file` instead of
    /// real hardware.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for `--port`.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Newline-delimited NMEA sentences to replay through the mock UART
    /// when `--port` is not given.
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// Run for a bounded duration and print a sentence/fix summary
    /// instead of looping forever, mirroring the original firmware's
    /// HW_VALIDATION_TEST bring-up mode.
    #[arg(long)]
    validate: bool,

    /// Duration of a `--validate` run, in seconds.
    #[arg(long, default_value_t = 300)]
    validate_duration_secs: u64,
}

/// Dispatches to a real serial port or a replay-fed mock, mirroring how
/// the teacher's own daemon picks between a real and simulated backend
/// (`bvrd`'s `CanInterface::{Real,Sim}`) rather than making `main`
/// generic over the UART type.
enum TrackerUart {
    Serial(SerialUart),
    Replay(MockUart),
}

impl Uart for TrackerUart {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HalError> {
        match self {
            Self::Serial(u) => u.read_line(timeout),
            Self::Replay(u) => u.read_line(timeout),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trackerd=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let mut uart = match &args.port {
        Some(port) => {
            info!(port = %port, baud = args.baud, "opening serial GPS receiver");
            TrackerUart::Serial(
                SerialUart::open(port, args.baud, tracker_loop::UART_READ_TIMEOUT)
                    .with_context(|| format!("failed to open serial port {port}"))?,
            )
        }
        None => {
            let mut mock = MockUart::new();
            if let Some(path) = &args.replay_file {
                let data = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read replay file {}", path.display()))?;
                mock.push_data(&data);
                info!(file = %path.display(), "replaying NMEA sentences from file");
            } else {
                warn!("no --port or --replay-file given; running with an empty mock UART");
            }
            TrackerUart::Replay(mock)
        }
    };

    let power = PowerSignal::new();
    let mut gpio = MockGpio::new();
    power
        .init(&mut gpio)
        .map_err(|e| anyhow::anyhow!("power management init failed: {e}"))?;

    let clock = MockClock::new();
    let fs = MockFilesystem::new();
    let mut storage = StorageEngine::new(fs);

    match storage.init(clock.now_ms()) {
        Ok(()) => info!(file = storage.filename(), "storage initialized"),
        Err(e) => {
            error!(?e, "fatal storage init failure, halting");
            return Err(anyhow::anyhow!("storage init failed: {e}"));
        }
    }

    info!("entering GPS track recorder event loop");

    let (reason, report) = if args.validate {
        run_validate(&mut uart, &mut storage, &power, &clock, args.validate_duration_secs)
    } else {
        tracker_loop::run(&mut uart, &mut storage, &power, &clock, || true)
    };

    match reason {
        StopReason::PowerLoss => info!("shut down cleanly after power-loss signal"),
        StopReason::CallerRequested => {
            info!("validation run complete, shutting down storage");
            if let Err(e) = storage.shutdown() {
                error!(?e, "storage shutdown failed after validation run");
            }
        }
    }
    log_report(&report);

    Ok(())
}

/// Bounded rendition of the original firmware's `HW_VALIDATION_TEST` mode:
/// runs for a fixed wall-clock duration instead of forever, then returns
/// so the caller can print a summary.
fn run_validate<U: Uart>(
    uart: &mut U,
    storage: &mut StorageEngine<MockFilesystem>,
    power: &PowerSignal,
    clock: &MockClock,
    duration_secs: u64,
) -> (StopReason, LoopReport) {
    let start = Instant::now();
    let deadline = Duration::from_secs(duration_secs);
    info!(duration_secs, "starting bounded validation run");

    tracker_loop::run(uart, storage, power, clock, || {
        clock.advance_ms(1);
        start.elapsed() < deadline
    })
}

fn log_report(report: &LoopReport) {
    info!(
        lines_read = report.lines_read,
        sentences_rejected = report.sentences_rejected,
        fixes_completed = report.fixes_completed,
        fixes_accepted = report.fixes_accepted,
        fixes_rejected = report.fixes_rejected,
        storage_errors = report.storage_errors,
        "loop summary"
    );
}
