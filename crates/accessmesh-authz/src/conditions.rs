//! Attribute condition parsing and matching.
//!
//! Conditions are stored as strings and parsed at evaluation time. A value
//! that does not parse is reported to the caller, which treats the owning
//! policy as non-matching.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{FixedOffset, TimeZone, Timelike};
use chrono_tz::Tz;
use ipnet::IpNet;

use accessmesh_core::Timestamp;

use crate::error::{AuthzError, AuthzResult};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Parses an `ip_range` entry.
///
/// Accepts CIDR notation (`10.0.0.0/24`, `2001:db8::/32`) or a bare address,
/// which is treated as a host route (`/32` or `/128`).
pub fn parse_ip_range(value: &str) -> Option<IpNet> {
    let value = value.trim();
    value
        .parse::<IpNet>()
        .ok()
        .or_else(|| value.parse::<IpAddr>().ok().map(IpNet::from))
}

/// Parses a source address, folding IPv4-mapped IPv6 addresses to IPv4.
pub fn parse_source_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// A half-open time-of-day window `[start, end)` in minutes after midnight.
///
/// `start > end` wraps past midnight. `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: u16,
    end: u16,
}

impl TimeWindow {
    /// Creates a window from minutes after midnight.
    ///
    /// Returns `None` if either bound is not below 24:00.
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (start < MINUTES_PER_DAY && end < MINUTES_PER_DAY).then_some(Self { start, end })
    }

    /// Returns `true` if `minute_of_day` falls inside the window.
    pub fn contains(&self, minute_of_day: u16) -> bool {
        use std::cmp::Ordering;

        match self.start.cmp(&self.end) {
            Ordering::Equal => true,
            Ordering::Less => self.start <= minute_of_day && minute_of_day < self.end,
            Ordering::Greater => minute_of_day >= self.start || minute_of_day < self.end,
        }
    }

    /// Returns `true` if the local time of `at` in `zone` falls inside the
    /// window.
    pub fn contains_instant(&self, at: Timestamp, zone: Timezone) -> bool {
        self.contains(minute_of_day(at, zone))
    }
}

impl FromStr for TimeWindow {
    type Err = ();

    /// Parses strict `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s.trim().split_once('-').ok_or(())?;
        Self::new(parse_clock(start)?, parse_clock(end)?).ok_or(())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

fn parse_clock(s: &str) -> Result<u16, ()> {
    let (hh, mm) = s.split_once(':').ok_or(())?;
    let hours = two_digits(hh)?;
    let minutes = two_digits(mm)?;
    if hours >= 24 || minutes >= 60 {
        return Err(());
    }
    Ok(hours * 60 + minutes)
}

fn two_digits(s: &str) -> Result<u16, ()> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    s.parse().map_err(|_| ())
}

/// The zone time windows are evaluated in.
///
/// A named zone follows its daylight-saving rules; a fixed offset never
/// shifts.
///
/// ```rust
/// use accessmesh_authz::Timezone;
///
/// let berlin: Timezone = "Europe/Berlin".parse().unwrap();
/// assert_eq!(berlin.to_string(), "Europe/Berlin");
///
/// let india: Timezone = "+05:30".parse().unwrap();
/// assert_eq!(india.to_string(), "+05:30");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    /// A constant UTC offset.
    Fixed(FixedOffset),
    /// An IANA zone such as `Europe/Berlin`.
    Named(Tz),
}

impl Timezone {
    /// Coordinated Universal Time.
    pub const UTC: Self = Self::Named(Tz::UTC);

    fn local_clock(self, at: Timestamp) -> (u32, u32) {
        match self {
            Self::Fixed(offset) => {
                let local = at.with_timezone(&offset);
                (local.hour(), local.minute())
            }
            Self::Named(zone) => {
                let local = zone.from_utc_datetime(&at.naive_utc());
                (local.hour(), local.minute())
            }
        }
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self::UTC
    }
}

impl FromStr for Timezone {
    type Err = AuthzError;

    /// Accepts an IANA name, `Z`, `UTC`, or an offset like `+05:30`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_timezone(s)
    }
}

impl fmt::Display for Timezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Named(zone) => f.write_str(zone.name()),
        }
    }
}

impl From<FixedOffset> for Timezone {
    fn from(offset: FixedOffset) -> Self {
        Self::Fixed(offset)
    }
}

impl From<Tz> for Timezone {
    fn from(zone: Tz) -> Self {
        Self::Named(zone)
    }
}

/// Minutes after local midnight of `at` in `zone`.
pub fn minute_of_day(at: Timestamp, zone: Timezone) -> u16 {
    let (hour, minute) = zone.local_clock(at);
    // hour < 24 and minute < 60, so the result is below 1440.
    u16::try_from(hour * 60 + minute).unwrap_or(0)
}

/// Parses a timezone: an IANA name (`Europe/Berlin`), `Z`, `UTC`, or a fixed
/// offset (`+05:30`, `-08:00`).
pub fn parse_timezone(value: &str) -> AuthzResult<Timezone> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Timezone::UTC);
    }

    let invalid = || AuthzError::InvalidTimezone(value.to_string());
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return trimmed.parse::<Tz>().map(Timezone::Named).map_err(|_| invalid()),
    };
    let minutes = i32::from(parse_clock(rest).map_err(|()| invalid())?);
    FixedOffset::east_opt(sign * minutes * 60)
        .map(Timezone::Fixed)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window(s: &str) -> TimeWindow {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_ip_range() {
        assert_eq!(
            parse_ip_range("10.0.0.0/24"),
            Some("10.0.0.0/24".parse().unwrap())
        );
        assert_eq!(
            parse_ip_range("192.168.1.7"),
            Some("192.168.1.7/32".parse().unwrap())
        );
        assert_eq!(parse_ip_range("2001:db8::1"), Some("2001:db8::1/128".parse().unwrap()));
        assert_eq!(parse_ip_range("10.0.0.0/33"), None);
        assert_eq!(parse_ip_range("not-an-ip"), None);
        assert_eq!(parse_ip_range(""), None);
    }

    #[test]
    fn test_cidr_boundaries() {
        let net = parse_ip_range("10.0.0.0/24").unwrap();
        for (ip, inside) in [
            ("10.0.0.0", true),
            ("10.0.0.255", true),
            ("10.0.1.0", false),
            ("9.255.255.255", false),
        ] {
            assert_eq!(net.contains(&parse_source_ip(ip).unwrap()), inside, "{ip}");
        }
    }

    #[test]
    fn test_mapped_source_is_canonicalised() {
        let net = parse_ip_range("10.0.0.0/24").unwrap();
        let ip = parse_source_ip("::ffff:10.0.0.9").unwrap();
        assert!(ip.is_ipv4());
        assert!(net.contains(&ip));
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(window("08:00-18:00").to_string(), "08:00-18:00");
        assert_eq!(window(" 22:00-02:00 ").to_string(), "22:00-02:00");
        for bad in ["8:00-18:00", "08:00", "24:00-01:00", "08:60-09:00", "ab:cd-ef:gh", "08:00-18:00-19:00", ""] {
            assert!(bad.parse::<TimeWindow>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_half_open_window() {
        let w = window("08:00-18:00");
        assert!(!w.contains(7 * 60 + 59));
        assert!(w.contains(8 * 60));
        assert!(w.contains(17 * 60 + 59));
        assert!(!w.contains(18 * 60));
    }

    #[test]
    fn test_midnight_wrap() {
        let w = window("22:00-02:00");
        assert!(w.contains(23 * 60));
        assert!(w.contains(60));
        assert!(!w.contains(3 * 60));
        assert!(w.contains(22 * 60));
        assert!(!w.contains(2 * 60));
    }

    #[test]
    fn test_equal_bounds_cover_day() {
        let w = window("00:00-00:00");
        assert!(w.contains(0));
        assert!(w.contains(MINUTES_PER_DAY - 1));
        assert!(window("09:30-09:30").contains(3));
    }

    fn fixed(seconds: i32) -> Timezone {
        Timezone::Fixed(FixedOffset::east_opt(seconds).unwrap())
    }

    #[test]
    fn test_minute_of_day_uses_offset() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        assert_eq!(minute_of_day(at, Timezone::UTC), 23 * 60 + 30);
        assert_eq!(minute_of_day(at, fixed(3600)), 30);
        assert!(window("00:00-01:00").contains_instant(at, fixed(3600)));
    }

    #[test]
    fn test_named_zone_follows_daylight_saving() {
        let berlin = parse_timezone("Europe/Berlin").unwrap();
        let office = window("08:00-09:00");

        // Saturday before the switch: CET, UTC+1.
        let before = Utc.with_ymd_and_hms(2024, 3, 30, 7, 30, 0).unwrap();
        assert_eq!(minute_of_day(before, berlin), 8 * 60 + 30);
        assert!(office.contains_instant(before, berlin));

        // Sunday after the switch: CEST, UTC+2.
        let after = Utc.with_ymd_and_hms(2024, 3, 31, 7, 30, 0).unwrap();
        assert_eq!(minute_of_day(after, berlin), 9 * 60 + 30);
        assert!(!office.contains_instant(after, berlin));
        let early = Utc.with_ymd_and_hms(2024, 3, 31, 6, 30, 0).unwrap();
        assert!(office.contains_instant(early, berlin));

        // A fixed +01:00 does not move.
        assert!(office.contains_instant(after, fixed(3600)));
        assert!(!office.contains_instant(early, fixed(3600)));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Z").unwrap(), Timezone::UTC);
        assert_eq!(parse_timezone("utc").unwrap(), Timezone::UTC);
        assert_eq!(parse_timezone("+05:30").unwrap(), fixed(19_800));
        assert_eq!(parse_timezone("-08:00").unwrap(), fixed(-28_800));
        assert_eq!(
            parse_timezone("Europe/Paris").unwrap(),
            Timezone::Named(chrono_tz::Europe::Paris)
        );
        assert_eq!(parse_timezone(" Asia/Kolkata ").unwrap().to_string(), "Asia/Kolkata");

        for bad in ["05:30", "+5", "Mars/Olympus", ""] {
            let err = parse_timezone(bad).unwrap_err();
            assert!(matches!(err, AuthzError::InvalidTimezone(_)), "{bad}");
        }
    }
}
