//! Stateful accept/reject decision over a stream of GPS fixes.
//!
//! A three-state machine (cold-start / moving / stopped) that rejects
//! stationary noise and implausible jumps while keeping exactly the
//! waypoints needed to reconstruct a track. The filter never blocks or
//! retries — every call to [`MovementFilter::process`] returns
//! immediately with an outcome.

use tracing::info;
use tracker_geo::haversine_m;
use tracker_types::GpsFix;

/// Fixes below this speed are treated as stationary.
pub const STATIONARY_THRESHOLD_KMH: f32 = 3.0;
/// Implied speed above this is rejected as an outlier rather than accepted.
pub const MAX_PLAUSIBLE_SPEED_KMH: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    ColdStart,
    Moving,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Accept,
    RejectInvalid,
    RejectStationary,
    RejectOutlier,
    RejectNoTimeDelta,
}

/// Owns the filter's current state and the last accepted fix.
pub struct MovementFilter {
    state: FilterState,
    last_accepted: Option<GpsFix>,
}

impl Default for MovementFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MovementFilter {
    pub fn new() -> Self {
        Self {
            state: FilterState::ColdStart,
            last_accepted: None,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn process(&mut self, fix: &GpsFix) -> ProcessOutcome {
        if !fix.is_valid() {
            return ProcessOutcome::RejectInvalid;
        }

        let stationary = is_stationary(fix);

        match self.state {
            FilterState::ColdStart => {
                if stationary {
                    return ProcessOutcome::RejectStationary;
                }
                self.accept(fix, FilterState::Moving)
            }

            FilterState::Moving => {
                if let Some(last) = self.last_accepted {
                    let dt = epoch_seconds(fix) - epoch_seconds(&last);
                    if dt <= 0.0 {
                        return ProcessOutcome::RejectNoTimeDelta;
                    }
                    if dt >= 0.5 {
                        let dist = haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude);
                        let implied_kmh = (dist / dt) * 3.6;
                        if implied_kmh > MAX_PLAUSIBLE_SPEED_KMH {
                            return ProcessOutcome::RejectOutlier;
                        }
                    }
                }

                if stationary {
                    self.accept(fix, FilterState::Stopped)
                } else {
                    self.accept(fix, FilterState::Moving)
                }
            }

            FilterState::Stopped => {
                if stationary {
                    ProcessOutcome::RejectStationary
                } else {
                    self.accept(fix, FilterState::Moving)
                }
            }
        }
    }

    fn accept(&mut self, fix: &GpsFix, next_state: FilterState) -> ProcessOutcome {
        let old_state = self.state;
        self.state = next_state;
        self.last_accepted = Some(*fix);
        if next_state != old_state {
            info!(?old_state, new_state = ?self.state, "movement filter state transition");
        }
        ProcessOutcome::Accept
    }
}

fn is_stationary(fix: &GpsFix) -> bool {
    if !fix.flags.contains(tracker_types::FixFlags::HAS_SPEED) {
        return true;
    }
    fix.speed_kmh < STATIONARY_THRESHOLD_KMH
}

/// Coarse calendar-arithmetic proxy for elapsed seconds, not a true
/// civil-time conversion. Monotonic within a day; overestimates across
/// month/year boundaries. Sufficient here because only sign and relative
/// ordering within a single track matter.
fn epoch_seconds(fix: &GpsFix) -> f64 {
    let mut s = 0.0;
    if fix.flags.contains(tracker_types::FixFlags::HAS_DATE) {
        s += fix.year as f64 * 365.25 * 86400.0;
        s += fix.month as f64 * 30.44 * 86400.0;
        s += fix.day as f64 * 86400.0;
    }
    s += fix.hour as f64 * 3600.0;
    s += fix.minute as f64 * 60.0;
    s += fix.second as f64;
    s += fix.centisecond as f64 / 100.0;
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_types::FixFlags;

    fn fix_at(second: u8, speed_kmh: f32, lat: f64, lon: f64) -> GpsFix {
        GpsFix {
            flags: FixFlags::VALID | FixFlags::HAS_LATLON | FixFlags::HAS_SPEED,
            second,
            latitude: lat,
            longitude: lon,
            speed_kmh,
            fix_quality: 1,
            ..Default::default()
        }
    }

    #[test]
    fn s3_cold_start_then_moving_then_stopped() {
        let mut filter = MovementFilter::new();

        // t=0, speed=1 -> stationary, cold start rejects.
        assert_eq!(filter.process(&fix_at(0, 1.0, 47.0, 8.0)), ProcessOutcome::RejectStationary);
        // t=1, speed=1 -> still stationary, cold start rejects again.
        assert_eq!(filter.process(&fix_at(1, 1.0, 47.0, 8.0)), ProcessOutcome::RejectStationary);

        // t=2, speed=20, 2m away -> first non-stationary fix, accept into MOVING.
        let lat2 = 47.0 + 2.0 / 111_320.0;
        let r1 = filter.process(&fix_at(2, 20.0, lat2, 8.0));
        assert_eq!(r1, ProcessOutcome::Accept);
        assert_eq!(filter.state(), FilterState::Moving);

        // t=3, speed=40, 20m further -> plausible, stays MOVING.
        let lat3 = lat2 + 20.0 / 111_320.0;
        let r2 = filter.process(&fix_at(3, 40.0, lat3, 8.0));
        assert_eq!(r2, ProcessOutcome::Accept);
        assert_eq!(filter.state(), FilterState::Moving);

        // t=4, speed=1, 21m further -> stationary, accept and transition to STOPPED.
        let lat4 = lat3 + 21.0 / 111_320.0;
        let r3 = filter.process(&fix_at(4, 1.0, lat4, 8.0));
        assert_eq!(r3, ProcessOutcome::Accept);
        assert_eq!(filter.state(), FilterState::Stopped);
    }

    #[test]
    fn s4_implausible_jump_is_outlier() {
        let mut filter = MovementFilter::new();
        assert_eq!(filter.process(&fix_at(0, 20.0, 47.0, 8.0)), ProcessOutcome::Accept);

        // 1 degree apart (~111km) in 1 second implies ~400,000 km/h.
        let far = fix_at(1, 20.0, 48.0, 8.0);
        assert_eq!(filter.process(&far), ProcessOutcome::RejectOutlier);
    }

    #[test]
    fn invalid_fix_is_rejected_regardless_of_state() {
        let mut filter = MovementFilter::new();
        let mut invalid = fix_at(0, 20.0, 47.0, 8.0);
        invalid.flags.remove(FixFlags::VALID);
        assert_eq!(filter.process(&invalid), ProcessOutcome::RejectInvalid);
    }

    #[test]
    fn missing_latlon_is_rejected() {
        let mut filter = MovementFilter::new();
        let mut invalid = fix_at(0, 20.0, 47.0, 8.0);
        invalid.flags.remove(FixFlags::HAS_LATLON);
        assert_eq!(filter.process(&invalid), ProcessOutcome::RejectInvalid);
    }

    #[test]
    fn absent_speed_is_treated_as_stationary() {
        let mut filter = MovementFilter::new();
        let mut no_speed = fix_at(0, 0.0, 47.0, 8.0);
        no_speed.flags.remove(FixFlags::HAS_SPEED);
        assert_eq!(filter.process(&no_speed), ProcessOutcome::RejectStationary);
    }

    #[test]
    fn zero_or_negative_time_delta_is_rejected() {
        let mut filter = MovementFilter::new();
        assert_eq!(filter.process(&fix_at(5, 20.0, 47.0, 8.0)), ProcessOutcome::Accept);

        // Same timestamp again: dt == 0.
        assert_eq!(
            filter.process(&fix_at(5, 20.0, 47.001, 8.0)),
            ProcessOutcome::RejectNoTimeDelta
        );
    }

    #[test]
    fn cold_start_is_never_re_entered() {
        let mut filter = MovementFilter::new();
        assert_eq!(filter.process(&fix_at(0, 20.0, 47.0, 8.0)), ProcessOutcome::Accept);
        assert_ne!(filter.state(), FilterState::ColdStart);

        // Invalid fixes are rejected outright but never reset state to ColdStart.
        let mut invalid = fix_at(1, 20.0, 47.0, 8.0);
        invalid.flags.remove(FixFlags::VALID);
        filter.process(&invalid);
        assert_ne!(filter.state(), FilterState::ColdStart);
    }
}
