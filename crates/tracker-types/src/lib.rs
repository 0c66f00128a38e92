//! Shared GPS fix type for the track recorder firmware.
//!
//! `GpsFix` is the one value that crosses component boundaries: the NMEA
//! epoch assembler produces it, the movement filter judges it, and the
//! storage engine serializes it. Every other piece of state
//! (`ParserState`, `FilterState`, `StorageState`) is private to its owning
//! crate.

use bitflags::bitflags;

bitflags! {
    /// Which fields of a [`GpsFix`] carry meaningful values.
    ///
    /// Mirrors the C original's `GPS_FIX_VALID` / `GPS_HAS_*` bit
    /// definitions one for one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FixFlags: u32 {
        /// The fix as a whole is usable (implies HAS_LATLON and fix_quality >= 1).
        const VALID       = 1 << 0;
        const HAS_TIME     = 1 << 1;
        const HAS_DATE     = 1 << 2;
        const HAS_LATLON   = 1 << 3;
        const HAS_ALT      = 1 << 4;
        const HAS_SPEED    = 1 << 5;
        const HAS_COURSE   = 1 << 6;
        const HAS_HDOP     = 1 << 7;
    }
}

/// A snapshot of one positional epoch, merged from GGA/RMC sentences
/// sharing a timestamp.
///
/// A field is only meaningful when its corresponding [`FixFlags`] bit is
/// set; readers must check the flag before trusting the value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsFix {
    pub flags: FixFlags,

    // UTC time-of-day.
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centisecond: u8,

    // UTC date (year is the four-digit form, 2000 + yy for NMEA's two-digit field).
    pub day: u8,
    pub month: u8,
    pub year: u16,

    // Position.
    pub latitude: f64,
    pub longitude: f64,

    // Kinematics.
    pub altitude_m: f32,
    pub speed_kmh: f32,
    pub course_deg: f32,

    // Quality.
    pub fix_quality: u8,
    pub satellites: u8,
    pub hdop: f32,
}

impl GpsFix {
    /// True when the fix satisfies the crate-wide validity invariant:
    /// `VALID ⇒ HAS_LATLON ∧ fix_quality ≥ 1`.
    pub fn is_valid(&self) -> bool {
        self.flags.contains(FixFlags::VALID)
            && self.flags.contains(FixFlags::HAS_LATLON)
            && self.fix_quality >= 1
    }
}
