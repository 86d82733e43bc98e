//! US Mountain Time wall clock <-> UTC conversion.
//!
//! Platforms report local times without an offset. The DST rule is applied by
//! hand so conversion never depends on the host's timezone database:
//! daylight time (UTC-6) runs from the 2nd Sunday of March at 02:00 local
//! (09:00 UTC) to the 1st Sunday of November at 02:00 local (08:00 UTC);
//! everything else is standard time (UTC-7).

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc, Weekday,
};
use thiserror::Error;

pub const STANDARD_OFFSET_HOURS: i64 = 7;
pub const DAYLIGHT_OFFSET_HOURS: i64 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("invalid local date-time {0:?} (expected YYYY-MM-DD HH:MM)")]
    DateTime(String),
    #[error("invalid date {0:?} (expected YYYY-MM-DD)")]
    Date(String),
    #[error("invalid time {0:?} (expected HH:MM)")]
    Time(String),
    #[error("invalid UTC timestamp {0:?}")]
    Instant(String),
}

fn nth_sunday(year: i32, month: u32, n: u8) -> NaiveDate {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, n).unwrap_or(NaiveDate::MIN)
}

/// UTC instants bounding daylight time for `year`: `[start, end)`.
pub fn daylight_window(year: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = nth_sunday(year, 3, 2).and_time(NaiveTime::MIN) + Duration::hours(2 + STANDARD_OFFSET_HOURS);
    let end = nth_sunday(year, 11, 1).and_time(NaiveTime::MIN) + Duration::hours(2 + DAYLIGHT_OFFSET_HOURS);
    (start.and_utc(), end.and_utc())
}

pub fn is_daylight_time(instant: DateTime<Utc>) -> bool {
    let (start, end) = daylight_window(instant.year());
    instant >= start && instant < end
}

fn offset_hours_at(instant: DateTime<Utc>) -> i64 {
    if is_daylight_time(instant) {
        DAYLIGHT_OFFSET_HOURS
    } else {
        STANDARD_OFFSET_HOURS
    }
}

/// Convert a Mountain wall-clock time to an absolute instant.
///
/// The wall clock is first read as if it were UTC to pick the season, then the
/// season's fixed offset is applied. Around the 02:00 transitions this can be an
/// hour off, which never matters for tee sheets.
pub fn to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    let approx = local.and_utc();
    (local + Duration::hours(offset_hours_at(approx))).and_utc()
}

/// Inverse of [`to_utc`]. Exact, since the instant determines the season.
pub fn to_local(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.naive_utc() - Duration::hours(offset_hours_at(instant))
}

pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    to_local(instant).date()
}

/// UTC bounds `[start, end)` of one Mountain calendar day.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = to_utc(date.and_time(NaiveTime::MIN));
    let next = date.succ_opt().unwrap_or(date);
    let end = to_utc(next.and_time(NaiveTime::MIN));
    (start, end)
}

/// Parse a `"YYYY-MM-DD HH:MM"` Mountain wall clock (ForeUp style).
pub fn parse_local_datetime(value: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = value.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .map(to_utc)
        .map_err(|_| TimeParseError::DateTime(value.to_string()))
}

/// Parse a separate local date and time (Chronogolf style).
pub fn parse_local_date_and_time(date: &str, time: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Ok(to_utc(date.and_time(time)))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, TimeParseError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| TimeParseError::Date(value.to_string()))
}

pub fn parse_time(value: &str) -> Result<NaiveTime, TimeParseError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| TimeParseError::Time(value.to_string()))
}

/// Parse an instant that the platform already reports in UTC (or with an explicit offset).
pub fn parse_utc_instant(value: &str) -> Result<DateTime<Utc>, TimeParseError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimeParseError::Instant(value.to_string()))
}

pub fn to_iso(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid instant")
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .expect("valid local")
    }

    #[test]
    fn daylight_window_matches_published_transitions() {
        assert_eq!(daylight_window(2026), (utc(2026, 3, 8, 9, 0), utc(2026, 11, 1, 8, 0)));
        assert_eq!(daylight_window(2025), (utc(2025, 3, 9, 9, 0), utc(2025, 11, 2, 8, 0)));
        assert_eq!(daylight_window(2024), (utc(2024, 3, 10, 9, 0), utc(2024, 11, 3, 8, 0)));
        assert_eq!(daylight_window(2027), (utc(2027, 3, 14, 9, 0), utc(2027, 11, 7, 8, 0)));
    }

    #[test]
    fn summer_morning_is_six_hours_behind_utc() {
        let instant = parse_local_datetime("2026-07-15 08:00").unwrap();
        assert_eq!(to_iso(&instant), "2026-07-15T14:00:00Z");
    }

    #[test]
    fn winter_morning_is_seven_hours_behind_utc() {
        let instant = parse_local_datetime("2026-01-20 09:30").unwrap();
        assert_eq!(instant, utc(2026, 1, 20, 16, 30));
    }

    #[test]
    fn late_evening_local_rolls_into_next_utc_day() {
        let instant = parse_local_date_and_time("2026-12-31", "19:10").unwrap();
        assert_eq!(instant, utc(2027, 1, 1, 2, 10));
    }

    #[test]
    fn round_trip_recovers_local_wall_clock() {
        let samples = [
            local(2026, 1, 5, 7, 0),
            local(2026, 2, 28, 15, 45),
            local(2026, 4, 1, 6, 12),
            local(2026, 6, 21, 19, 50),
            local(2026, 10, 15, 11, 0),
            local(2026, 12, 12, 13, 20),
        ];
        for wall_clock in samples {
            let instant = to_utc(wall_clock);
            let hours = (instant.naive_utc() - wall_clock).num_hours();
            assert!(hours == 6 || hours == 7, "unexpected offset {hours} for {wall_clock}");
            assert_eq!(to_local(instant), wall_clock);
        }
    }

    #[test]
    fn day_after_transition_uses_new_offset() {
        assert_eq!(to_utc(local(2026, 3, 9, 8, 0)), utc(2026, 3, 9, 14, 0));
        assert_eq!(to_utc(local(2026, 11, 2, 8, 0)), utc(2026, 11, 2, 15, 0));
    }

    #[test]
    fn day_bounds_cover_one_local_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start, utc(2026, 7, 15, 6, 0));
        assert_eq!(end, utc(2026, 7, 16, 6, 0));
        assert_eq!(local_date(utc(2026, 7, 16, 5, 59)), date);
    }

    #[test]
    fn utc_instants_are_not_shifted() {
        let instant = parse_utc_instant("2026-07-15T14:00:00.000Z").unwrap();
        assert_eq!(instant, utc(2026, 7, 15, 14, 0));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(parse_local_datetime("07/15/2026 8am"), Err(TimeParseError::DateTime(_))));
        assert!(matches!(parse_local_date_and_time("2026-07-15", "8"), Err(TimeParseError::Time(_))));
        assert!(matches!(parse_date("15-07-2026"), Err(TimeParseError::Date(_))));
        assert!(parse_utc_instant("2026-07-15 14:00").is_err());
    }
}
