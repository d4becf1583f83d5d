//! CF time coordinate decoding and month arithmetic.
//!
//! Time coordinates are stored as offsets from a reference date, described by
//! a `units` attribute such as `hours since 1900-01-01 00:00:00.0` or
//! `seconds since 1970-01-01`. Only the standard (proleptic) Gregorian
//! calendars are supported.

use crate::error::{CacheError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

const SUPPORTED_CALENDARS: [&str; 3] = ["standard", "gregorian", "proleptic_gregorian"];

/// Parsed `<unit> since <reference>` time units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub seconds_per_unit: f64,
    pub reference: NaiveDateTime,
}

impl TimeUnits {
    /// Parses a CF `units` string.
    pub fn parse(units: &str) -> Result<Self> {
        let lowered = units.trim().to_ascii_lowercase();
        let (unit, reference) = lowered
            .split_once(" since ")
            .ok_or_else(|| CacheError::TimeDecode(format!("missing 'since' in units '{units}'")))?;

        let seconds_per_unit = match unit.trim() {
            "milliseconds" | "millisecond" | "msecs" | "msec" | "ms" => 0.001,
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "days" | "day" | "d" => 86_400.0,
            other => {
                return Err(CacheError::TimeDecode(format!("unsupported time unit '{other}'")));
            }
        };

        Ok(TimeUnits {
            seconds_per_unit,
            reference: parse_reference(reference)?,
        })
    }

    /// Converts one raw offset to a timestamp, rounded to the millisecond.
    pub fn decode(&self, offset: f64) -> Result<NaiveDateTime> {
        if !offset.is_finite() {
            return Err(CacheError::TimeDecode(format!("non-finite time offset {offset}")));
        }
        let millis = (offset * self.seconds_per_unit * 1_000.0).round();
        // the cast saturates; the bounds are rejected by try_milliseconds
        Duration::try_milliseconds(millis as i64)
            .and_then(|delta| self.reference.checked_add_signed(delta))
            .ok_or_else(|| CacheError::TimeDecode(format!("time offset {offset} out of range")))
    }

    pub fn decode_all(&self, offsets: &[f64]) -> Result<Vec<NaiveDateTime>> {
        offsets.iter().map(|&o| self.decode(o)).collect()
    }
}

/// Rejects calendars other than the Gregorian family. A missing attribute
/// means `standard`.
pub fn check_calendar(calendar: Option<&str>) -> Result<()> {
    match calendar.map(|c| c.trim().to_ascii_lowercase()) {
        None => Ok(()),
        Some(c) if SUPPORTED_CALENDARS.contains(&c.as_str()) => Ok(()),
        Some(c) => Err(CacheError::TimeDecode(format!("unsupported calendar '{c}'"))),
    }
}

fn parse_reference(text: &str) -> Result<NaiveDateTime> {
    let cleaned = text
        .trim()
        .trim_end_matches("utc")
        .trim_end_matches('z')
        .trim()
        .replace('t', " ");

    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| CacheError::TimeDecode(format!("unparseable reference date '{text}'")))
}

/// Last calendar day of a month.
pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// (year, month) key of a timestamp.
pub fn year_month(ts: &NaiveDateTime) -> (i32, u32) {
    (ts.year(), ts.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_end_leap_years() {
        assert_eq!(month_end(2020, 2), NaiveDate::from_ymd_opt(2020, 2, 29));
        assert_eq!(month_end(2021, 2), NaiveDate::from_ymd_opt(2021, 2, 28));
        assert_eq!(month_end(1999, 12), NaiveDate::from_ymd_opt(1999, 12, 31));
        assert_eq!(month_end(2000, 4), NaiveDate::from_ymd_opt(2000, 4, 30));
    }

    #[test]
    fn test_calendar_check() {
        assert!(check_calendar(None).is_ok());
        assert!(check_calendar(Some("Gregorian")).is_ok());
        assert!(check_calendar(Some("proleptic_gregorian")).is_ok());
        assert!(check_calendar(Some("360_day")).is_err());
    }

    #[test]
    fn test_milliseconds_units() {
        let units = TimeUnits::parse("milliseconds since 1970-01-01 00:00:00").unwrap();
        assert_eq!(units.seconds_per_unit, 0.001);
        let expected = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_time(NaiveTime::MIN);
        assert_eq!(units.decode(1_577_836_800_000.0).unwrap(), expected);
    }

    #[test]
    fn test_extreme_offsets_are_errors() {
        let units = TimeUnits::parse("milliseconds since 1970-01-01").unwrap();
        for offset in [-(2f64.powi(63)), 2f64.powi(63), -1e300, 1e300] {
            assert!(matches!(units.decode(offset), Err(CacheError::TimeDecode(_))), "{offset}");
        }
        let days = TimeUnits::parse("days since 1970-01-01").unwrap();
        assert!(days.decode(1e15).is_err());
    }
}
