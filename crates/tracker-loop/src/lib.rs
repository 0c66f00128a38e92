//! The cooperative event loop that orchestrates the firmware core.
//!
//! Owns the parser and filter for its entire lifetime (the storage engine
//! is owned and `init`/`shutdown`-ed by the caller, since a fatal init
//! error must be handled before the loop ever starts). Every iteration, in
//! order: poll the power-loss flag and shut down cleanly if set, read one
//! line with a bounded timeout, feed the parser, run the filter over any
//! completed fix, and write accepted fixes to storage. Storage and parse
//! errors are logged and the loop continues; only the caller's `init`
//! failure is fatal.

use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use tracker_filter::{MovementFilter, ProcessOutcome};
use tracker_hal::{Clock, Filesystem, Uart};
use tracker_nmea::{FeedResult, Parser};
use tracker_power::PowerSignal;
use tracker_storage::StorageEngine;

/// UART read timeout per iteration, per `spec.md` §5.
pub const UART_READ_TIMEOUT: Duration = Duration::from_millis(1100);

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A power-loss interrupt was observed and storage was shut down cleanly.
    PowerLoss,
    /// The caller's `keep_going` predicate returned false (used by bounded
    /// bring-up/validation runs; the production loop never supplies one).
    CallerRequested,
}

/// Tally of what happened across a [`run`] call, for logging and for the
/// bring-up validation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub lines_read: u64,
    pub sentences_rejected: u64,
    pub fixes_completed: u64,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    pub storage_errors: u64,
}

/// Runs the event loop until a power-loss interrupt is observed or
/// `keep_going` returns false, whichever comes first. `keep_going` is
/// checked at the top of every iteration; the production binary passes
/// `|| true` so only the power signal can end the loop.
///
/// `storage` must already be successfully `init`-ed by the caller — a
/// fatal `Mount`/`Open`/`TooManyFiles` error belongs to startup, not this
/// loop (`spec.md` §7).
pub fn run<U: Uart, FS: Filesystem>(
    uart: &mut U,
    storage: &mut StorageEngine<FS>,
    power: &PowerSignal,
    clock: &impl Clock,
    mut keep_going: impl FnMut() -> bool,
) -> (StopReason, LoopReport) {
    let mut parser = Parser::new();
    let mut filter = MovementFilter::new();
    let mut report = LoopReport::default();

    loop {
        if !keep_going() {
            return (StopReason::CallerRequested, report);
        }

        if power.is_shutdown_requested() {
            info!("power loss detected, shutting down storage");
            if let Err(e) = storage.shutdown() {
                error!(?e, "storage shutdown failed during power-loss handling");
            }
            return (StopReason::PowerLoss, report);
        }

        let line = match uart.read_line(UART_READ_TIMEOUT) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!(?e, "uart read error");
                continue;
            }
        };
        report.lines_read += 1;

        let feed_result = match parser.feed(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(sentence = %line, error = %e, "sentence rejected");
                report.sentences_rejected += 1;
                continue;
            }
        };

        if feed_result != FeedResult::FixReady {
            continue;
        }

        let Some(fix) = parser.take_fix() else {
            continue;
        };
        report.fixes_completed += 1;

        match filter.process(&fix) {
            ProcessOutcome::Accept => {}
            other => {
                trace!(?other, "fix rejected by movement filter");
                report.fixes_rejected += 1;
                continue;
            }
        }

        let now_ms = clock.now_ms();
        match storage.write_fix(&fix, now_ms) {
            Ok(()) => {
                debug!(file = storage.filename(), "fix written");
                report.fixes_accepted += 1;
            }
            Err(e) => {
                error!(?e, "storage write failed");
                report.storage_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_hal::mock::{MockClock, MockFilesystem, MockGpio, MockUart};
    use tracker_hal::Edge;

    fn checksum(body: &str) -> String {
        format!("{:02X}", body.bytes().fold(0u8, |acc, b| acc ^ b))
    }

    fn sentence(body: &str) -> String {
        format!("${}*{}", body, checksum(body))
    }

    #[test]
    fn accepts_a_moving_fix_and_writes_it() {
        let mut uart = MockUart::new();
        // Two epochs of GGA+RMC so an epoch completes with HAS_SPEED set
        // above the stationary threshold.
        uart.push_line(sentence(
            "GPGGA,092725.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,",
        ));
        uart.push_line(sentence(
            "GPRMC,092725.00,A,4717.11399,N,00833.91590,E,10.0,54.7,191194,020.3,E",
        ));
        uart.push_line(sentence(
            "GPGGA,092726.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,",
        ));

        let fs = MockFilesystem::new();
        let mut storage = StorageEngine::new(fs);
        storage.init(0).unwrap();

        let power = PowerSignal::new();
        let clock = MockClock::new();

        let mut iterations = 0u32;
        let (reason, report) = run(&mut uart, &mut storage, &power, &clock, || {
            iterations += 1;
            iterations <= 4
        });

        assert_eq!(reason, StopReason::CallerRequested);
        assert_eq!(report.fixes_completed, 1);
        assert_eq!(report.fixes_accepted, 1);

        let contents = storage.fs().contents("track.csv").unwrap();
        let text = String::from_utf8(contents).unwrap();
        assert_eq!(text.lines().count(), 2); // header + one row
    }

    #[test]
    fn power_loss_triggers_clean_shutdown_and_stops_the_loop() {
        let mut uart = MockUart::new();
        let fs = MockFilesystem::new();
        let mut storage = StorageEngine::new(fs);
        storage.init(0).unwrap();

        let power = PowerSignal::new();
        let mut gpio = MockGpio::new();
        power.init(&mut gpio).unwrap();
        gpio.trigger_irq(tracker_power::VBUS_GPIO_PIN, Edge::Falling, 0);

        let clock = MockClock::new();
        let (reason, _report) = run(&mut uart, &mut storage, &power, &clock, || true);

        assert_eq!(reason, StopReason::PowerLoss);
        assert!(!storage.is_open());
        assert!(storage.fs().contents("_dirty").is_none());
    }

    #[test]
    fn non_ready_feed_does_not_advance_fix_counters() {
        let mut uart = MockUart::new();
        uart.push_line(sentence(
            "GPGSA,A,3,04,05,,,,,,,,,,2.5,1.3,2.1,",
        ));

        let fs = MockFilesystem::new();
        let mut storage = StorageEngine::new(fs);
        storage.init(0).unwrap();

        let power = PowerSignal::new();
        let clock = MockClock::new();

        let mut iterations = 0u32;
        let (_reason, report) = run(&mut uart, &mut storage, &power, &clock, || {
            iterations += 1;
            iterations <= 2
        });

        assert_eq!(report.lines_read, 1);
        assert_eq!(report.fixes_completed, 0);
    }
}
