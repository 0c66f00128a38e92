//! Streaming, checksummed NMEA-0183 epoch assembler.
//!
//! Merges GGA (positional) and RMC (recommended-minimum) sentences that
//! share a UTC time-of-day into a single [`GpsFix`]. The parser never
//! blocks and never retries; a rejected sentence just means the next
//! `feed` call starts clean.

use thiserror::Error;
use tracing::{trace, warn};
use tracker_types::{FixFlags, GpsFix};

const MAX_SENTENCE_LEN: usize = 82;
const MAX_FIELDS: usize = 20;
const MAX_FIELD_LEN: usize = 15;
const KNOTS_TO_KMH: f64 = 1.852;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty sentence")]
    Empty,
    #[error("sentence missing leading '$'")]
    MissingDollar,
    #[error("sentence shorter than 6 characters")]
    TooShort,
    #[error("checksum validation failed")]
    BadChecksum,
}

/// Outcome of a single [`Parser::feed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// Sentence accepted but did not complete an epoch.
    None,
    /// An epoch completed; call [`Parser::take_fix`] to retrieve it.
    FixReady,
}

struct EpochTimestamp {
    hour: u8,
    minute: u8,
    second: u8,
    centisecond: u8,
}

/// Streaming NMEA epoch assembler.
///
/// Owns the in-progress fix, a completed-fix slot, and the bookkeeping
/// needed to know when one epoch ends and the next begins.
pub struct Parser {
    current: GpsFix,
    completed: Option<GpsFix>,
    gga_seen: bool,
    epoch: Option<EpochTimestamp>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            current: GpsFix::default(),
            completed: None,
            gga_seen: false,
            epoch: None,
        }
    }

    /// Feeds one line of receiver output. Trailing `\r`/`\n` are stripped
    /// by the caller's UART layer already; this also strips them
    /// defensively so the parser is safe to call with raw lines too.
    pub fn feed(&mut self, line: &str) -> Result<FeedResult, ParseError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }
        if !trimmed.starts_with('$') {
            return Err(ParseError::MissingDollar);
        }

        let truncated = if trimmed.len() > MAX_SENTENCE_LEN {
            &trimmed[..MAX_SENTENCE_LEN]
        } else {
            trimmed
        };

        if truncated.len() < 6 {
            return Err(ParseError::TooShort);
        }

        validate_checksum(truncated)?;

        let sentence_type = &truncated[3..6];
        let fields = split_fields(truncated);
        let Some(fields) = fields else {
            return Err(ParseError::BadChecksum);
        };

        match sentence_type {
            "GGA" => self.parse_gga(&fields),
            "RMC" => self.parse_rmc(&fields),
            other => {
                trace!(sentence_type = other, "unrecognized NMEA sentence type");
            }
        }

        if self.completed.is_some() {
            Ok(FeedResult::FixReady)
        } else {
            Ok(FeedResult::None)
        }
    }

    /// Consumes and returns the completed fix, if one is ready.
    pub fn take_fix(&mut self) -> Option<GpsFix> {
        self.completed.take()
    }

    fn start_new_epoch(&mut self, ts: EpochTimestamp) {
        if self.epoch.is_some() {
            self.completed = Some(self.current);
        }
        self.current = GpsFix::default();
        self.gga_seen = false;
        self.epoch = Some(ts);
    }

    fn roll_epoch_if_needed(&mut self, h: u8, m: u8, s: u8, cs: u8) {
        let matches = self
            .epoch
            .as_ref()
            .map(|e| e.hour == h && e.minute == m && e.second == s && e.centisecond == cs)
            .unwrap_or(false);
        if !matches {
            self.start_new_epoch(EpochTimestamp {
                hour: h,
                minute: m,
                second: s,
                centisecond: cs,
            });
        }
    }

    fn parse_gga(&mut self, fields: &[String]) {
        if fields.len() < 10 {
            return;
        }
        let Some((h, m, s, cs)) = parse_time(&fields[1]) else {
            return;
        };
        self.roll_epoch_if_needed(h, m, s, cs);

        let fix = &mut self.current;
        fix.hour = h;
        fix.minute = m;
        fix.second = s;
        fix.centisecond = cs;
        fix.flags |= FixFlags::HAS_TIME;

        if let Some(c) = fields[6].chars().next() {
            if let Some(d) = c.to_digit(10) {
                fix.fix_quality = d as u8;
            }
        }

        if !fields[7].is_empty() {
            fix.satellites = fields[7].parse().unwrap_or(0);
        }

        if !fields[8].is_empty() {
            if let Ok(v) = fields[8].parse::<f32>() {
                fix.hdop = v;
                fix.flags |= FixFlags::HAS_HDOP;
            }
        }

        if !fields[9].is_empty() {
            if let Ok(v) = fields[9].parse::<f32>() {
                fix.altitude_m = v;
                fix.flags |= FixFlags::HAS_ALT;
            }
        }

        if let (Some(lat), Some(lon)) = (
            parse_coordinate(&fields[2], &fields[3]),
            parse_coordinate(&fields[4], &fields[5]),
        ) {
            fix.latitude = lat;
            fix.longitude = lon;
            fix.flags |= FixFlags::HAS_LATLON;
        }

        if fix.fix_quality >= 1 {
            fix.flags |= FixFlags::VALID;
        } else {
            fix.flags.remove(FixFlags::VALID);
        }

        self.gga_seen = true;
    }

    fn parse_rmc(&mut self, fields: &[String]) {
        if fields.len() < 10 {
            return;
        }
        let Some((h, m, s, cs)) = parse_time(&fields[1]) else {
            return;
        };
        self.roll_epoch_if_needed(h, m, s, cs);

        let gga_seen = self.gga_seen;
        let fix = &mut self.current;
        fix.hour = h;
        fix.minute = m;
        fix.second = s;
        fix.centisecond = cs;
        fix.flags |= FixFlags::HAS_TIME;

        let active = fields[2].starts_with('A');
        if !active {
            fix.flags.remove(FixFlags::VALID);
        }

        if !gga_seen {
            if let (Some(lat), Some(lon)) = (
                parse_coordinate(&fields[3], &fields[4]),
                parse_coordinate(&fields[5], &fields[6]),
            ) {
                fix.latitude = lat;
                fix.longitude = lon;
                fix.flags |= FixFlags::HAS_LATLON;
            }
        }

        if !fields[7].is_empty() {
            if let Ok(knots) = fields[7].parse::<f64>() {
                fix.speed_kmh = (knots * KNOTS_TO_KMH) as f32;
                fix.flags |= FixFlags::HAS_SPEED;
            }
        }

        if !fields[8].is_empty() {
            if let Ok(v) = fields[8].parse::<f32>() {
                fix.course_deg = v;
                fix.flags |= FixFlags::HAS_COURSE;
            }
        }

        if fields.len() > 9 && !fields[9].is_empty() {
            if let Some((day, month, year)) = parse_date(&fields[9]) {
                fix.day = day;
                fix.month = month;
                fix.year = year;
                fix.flags |= FixFlags::HAS_DATE;
            }
        }

        if active && gga_seen && fix.fix_quality >= 1 {
            fix.flags |= FixFlags::VALID;
        } else if !active {
            fix.flags.remove(FixFlags::VALID);
        }
    }
}

fn validate_checksum(sentence: &str) -> Result<(), ParseError> {
    let bytes = sentence.as_bytes();
    let star = bytes.iter().rposition(|&b| b == b'*').ok_or(ParseError::BadChecksum)?;
    if star + 3 > bytes.len() {
        return Err(ParseError::BadChecksum);
    }

    let calc = bytes[1..star].iter().fold(0u8, |acc, &b| acc ^ b);
    let hex = &sentence[star + 1..star + 3];
    let expected = u8::from_str_radix(hex, 16).map_err(|_| ParseError::BadChecksum)?;

    if calc == expected {
        Ok(())
    } else {
        warn!(%sentence, "NMEA checksum mismatch");
        Err(ParseError::BadChecksum)
    }
}

fn split_fields(sentence: &str) -> Option<Vec<String>> {
    let star = sentence.find('*')?;
    let body = &sentence[1..star];

    let mut fields: Vec<String> = Vec::with_capacity(MAX_FIELDS);
    for part in body.split(',') {
        if fields.len() >= MAX_FIELDS {
            break;
        }
        let truncated = if part.len() > MAX_FIELD_LEN {
            &part[..MAX_FIELD_LEN]
        } else {
            part
        };
        fields.push(truncated.to_string());
    }
    Some(fields)
}

fn parse_time(field: &str) -> Option<(u8, u8, u8, u8)> {
    let bytes = field.as_bytes();
    if bytes.len() < 6 || !bytes[..6].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let hour = (bytes[0] - b'0') * 10 + (bytes[1] - b'0');
    let minute = (bytes[2] - b'0') * 10 + (bytes[3] - b'0');
    let second = (bytes[4] - b'0') * 10 + (bytes[5] - b'0');

    let mut centisecond = 0u8;
    if bytes.len() > 7 && bytes[6] == b'.' {
        if bytes[7].is_ascii_digit() {
            let mut cs = (bytes[7] - b'0') * 10;
            if bytes.len() > 8 && bytes[8].is_ascii_digit() {
                cs += bytes[8] - b'0';
            }
            centisecond = cs;
        }
    }

    Some((hour, minute, second, centisecond))
}

fn parse_date(field: &str) -> Option<(u8, u8, u16)> {
    let bytes = field.as_bytes();
    if bytes.len() < 6 || !bytes[..6].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let day = (bytes[0] - b'0') * 10 + (bytes[1] - b'0');
    let month = (bytes[2] - b'0') * 10 + (bytes[3] - b'0');
    let yy = ((bytes[4] - b'0') * 10 + (bytes[5] - b'0')) as u16;
    Some((day, month, 2000 + yy))
}

/// Decodes `DDMM.mmmm` (or `DDDMM.mmmm`) plus a hemisphere byte into
/// signed decimal degrees. Returns `None` if either input is empty or
/// the hemisphere is not one of N/S/E/W.
fn parse_coordinate(coord: &str, hemisphere: &str) -> Option<f64> {
    if coord.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw: f64 = coord.parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let mut value = degrees + minutes / 60.0;

    match hemisphere.as_bytes()[0] {
        b'N' | b'E' => {}
        b'S' | b'W' => value = -value,
        _ => return None,
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum(body: &str) -> String {
        format!("{:02X}", body.bytes().fold(0u8, |acc, b| acc ^ b))
    }

    fn sentence(body: &str) -> String {
        format!("${}*{}", body, checksum(body))
    }

    #[test]
    fn s1_two_gga_sentences_complete_an_epoch() {
        let mut parser = Parser::new();
        let s1 = sentence("GPGGA,092725.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,");
        let s2 = sentence("GPGGA,092726.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,");

        assert_eq!(parser.feed(&s1).unwrap(), FeedResult::None);
        assert_eq!(parser.feed(&s2).unwrap(), FeedResult::FixReady);

        let fix = parser.take_fix().unwrap();
        assert!((fix.latitude - 47.285233).abs() < 1e-5);
        assert!((fix.longitude - 8.565265).abs() < 1e-5);
        assert!((fix.altitude_m - 499.6).abs() < 0.01);
        assert_eq!(fix.satellites, 8);
        assert!((fix.hdop - 1.01).abs() < 0.001);
        assert!(fix.is_valid());
    }

    #[test]
    fn s2_bad_checksum_is_rejected_without_disturbing_state() {
        let mut parser = Parser::new();
        let good = sentence("GPGGA,092725.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,");
        assert_eq!(parser.feed(&good).unwrap(), FeedResult::None);

        let bad = "$GPGGA,092726.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,*00";
        assert_eq!(parser.feed(bad), Err(ParseError::BadChecksum));
        assert!(parser.take_fix().is_none());
    }

    #[test]
    fn unrecognized_sentence_type_yields_none_not_error() {
        let mut parser = Parser::new();
        let s = sentence("GPGSA,A,3,04,05,,,,,,,,,,2.5,1.3,2.1,");
        assert_eq!(parser.feed(&s).unwrap(), FeedResult::None);
    }

    #[test]
    fn missing_dollar_is_error() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed("GPGGA,*00"), Err(ParseError::MissingDollar));
    }

    #[test]
    fn empty_line_is_error() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed(""), Err(ParseError::Empty));
        assert_eq!(parser.feed("\r\n"), Err(ParseError::Empty));
    }

    #[test]
    fn rmc_supplies_latlon_only_when_gga_has_not() {
        let mut parser = Parser::new();
        let rmc = sentence(
            "GPRMC,092725.00,A,4717.11399,N,00833.91590,E,0.5,54.7,191194,020.3,E",
        );
        assert_eq!(parser.feed(&rmc).unwrap(), FeedResult::None);

        // Same timestamp: merges into the in-progress epoch rather than
        // emitting it. GGA's own coordinates differ and must win.
        let gga = sentence("GPGGA,092725.00,4750.00000,N,00900.00000,E,1,08,1.01,499.6,M,48.0,M,,");
        assert_eq!(parser.feed(&gga).unwrap(), FeedResult::None);

        // Advance the epoch to force emission.
        let next = sentence("GPGGA,092726.00,4750.00000,N,00900.00000,E,1,08,1.01,499.6,M,48.0,M,,");
        assert_eq!(parser.feed(&next).unwrap(), FeedResult::FixReady);

        let fix = parser.take_fix().unwrap();
        // GGA arrived after RMC in the same epoch, so GGA's coordinates win.
        assert!((fix.latitude - 47.833333).abs() < 1e-5);
    }

    #[test]
    fn rmc_arriving_first_supplies_latlon_until_gga_overwrites() {
        let mut parser = Parser::new();
        let rmc = sentence(
            "GPRMC,101500.00,A,4717.11399,N,00833.91590,E,0.5,54.7,191194,020.3,E",
        );
        assert_eq!(parser.feed(&rmc).unwrap(), FeedResult::None);

        // No GGA arrives this epoch before it rolls over: RMC's lat/lon
        // is what gets emitted.
        let next = sentence("GPRMC,101501.00,A,4717.11399,N,00833.91590,E,0.5,54.7,191194,020.3,E");
        assert_eq!(parser.feed(&next).unwrap(), FeedResult::FixReady);

        let fix = parser.take_fix().unwrap();
        assert!((fix.latitude - 47.285233).abs() < 1e-5);
        assert!(fix.flags.contains(FixFlags::HAS_LATLON));
    }

    #[test]
    fn rmc_status_void_clears_valid() {
        let mut parser = Parser::new();
        let gga = sentence("GPGGA,092725.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,");
        parser.feed(&gga).unwrap();
        let rmc_void = sentence("GPRMC,092725.00,V,4717.11399,N,00833.91590,E,0.5,54.7,191194,020.3,E");
        parser.feed(&rmc_void).unwrap();

        let gga2 = sentence("GPGGA,092726.00,4717.11399,N,00833.91590,E,1,08,1.01,499.6,M,48.0,M,,");
        let result = parser.feed(&gga2).unwrap();
        assert_eq!(result, FeedResult::FixReady);
        let fix = parser.take_fix().unwrap();
        assert!(!fix.is_valid());
    }

    #[test]
    fn coordinate_round_trip() {
        let lat = parse_coordinate("4717.11399", "N").unwrap();
        assert!((lat - 47.285233).abs() < 1e-5);
        let lon = parse_coordinate("00833.91590", "E").unwrap();
        assert!((lon - 8.565265).abs() < 1e-5);

        let lat_s = parse_coordinate("3723.456", "S").unwrap();
        assert!(lat_s < 0.0);
        let lon_w = parse_coordinate("12212.345", "W").unwrap();
        assert!(lon_w < 0.0);
    }

    #[test]
    fn ambiguous_hemisphere_is_absent() {
        assert_eq!(parse_coordinate("4717.11399", ""), None);
        assert_eq!(parse_coordinate("4717.11399", "X"), None);
    }

    #[test]
    fn sentence_longer_than_82_bytes_is_rejected() {
        let mut parser = Parser::new();
        let padding = "1".repeat(90);
        let long = format!("$GPGGA,{}*00", padding);
        assert_eq!(parser.feed(&long), Err(ParseError::BadChecksum));
    }
}
