//! Business-hours window enforcement.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};

use belfry_core::types::BusinessHours;

use crate::error::{Result, ScheduleError};
use crate::next_fire::parse_timezone;

// Bound on the opening search; a window with at least one allowed weekday
// always opens within this horizon.
const MAX_SEARCH_DAYS: u32 = 14;

/// Advance `candidate` to the window's next opening instant when it falls
/// outside the configured window; already-inside candidates are returned
/// unchanged, so the function is idempotent.
pub fn apply_business_hours(
    candidate: DateTime<Utc>,
    window: &BusinessHours,
) -> Result<DateTime<Utc>> {
    validate_business_hours(window)?;

    let tz = parse_timezone(&window.timezone)?;
    let start = NaiveTime::from_hms_opt(window.start_hour as u32, window.start_minute as u32, 0)
        .expect("validated above");
    let end = NaiveTime::from_hms_opt(window.end_hour as u32, window.end_minute as u32, 0)
        .expect("validated above");

    let local = candidate.with_timezone(&tz);
    let mut day = local.date_naive();

    for offset in 0..=MAX_SEARCH_DAYS {
        let weekday = day.weekday().num_days_from_monday() as u8;
        if window.days.contains(&weekday) {
            if offset == 0 {
                let time = local.time();
                if time >= start && time < end {
                    return Ok(candidate);
                }
                if time < start {
                    return opening_instant(&tz, day, start);
                }
                // Past today's close — fall through to the next allowed day.
            } else {
                return opening_instant(&tz, day, start);
            }
        }
        day = day
            .succ_opt()
            .ok_or_else(|| ScheduleError::InvalidSpec("date overflow".to_string()))?;
    }

    Err(ScheduleError::InvalidSpec(format!(
        "no business-hours opening within {MAX_SEARCH_DAYS} days"
    )))
}

/// Structural validation, run at job creation time.
pub fn validate_business_hours(window: &BusinessHours) -> Result<()> {
    if window.start_hour > 23 || window.end_hour > 23 {
        return Err(ScheduleError::InvalidSpec("hour out of range".to_string()));
    }
    if window.start_minute > 59 || window.end_minute > 59 {
        return Err(ScheduleError::InvalidSpec("minute out of range".to_string()));
    }
    let start = (window.start_hour as u32) * 60 + window.start_minute as u32;
    let end = (window.end_hour as u32) * 60 + window.end_minute as u32;
    if start >= end {
        return Err(ScheduleError::InvalidSpec(
            "window start must precede end".to_string(),
        ));
    }
    if window.days.is_empty() || window.days.iter().any(|d| *d > 6) {
        return Err(ScheduleError::InvalidSpec(
            "days must be a non-empty subset of 0..=6".to_string(),
        ));
    }
    parse_timezone(&window.timezone)?;
    Ok(())
}

fn opening_instant(
    tz: &chrono_tz::Tz,
    day: chrono::NaiveDate,
    start: NaiveTime,
) -> Result<DateTime<Utc>> {
    // `earliest` resolves DST ambiguity; a window opening swallowed by a DST
    // gap shifts to the first valid instant after it.
    match tz.from_local_datetime(&day.and_time(start)) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earlier, _) => Ok(earlier.with_timezone(&Utc)),
        chrono::LocalResult::None => {
            let shifted = day.and_time(start) + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    ScheduleError::InvalidSpec("window opening unresolvable in timezone".to_string())
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window_9_to_17(tz: &str) -> BusinessHours {
        BusinessHours {
            start_hour: 9,
            start_minute: 0,
            end_hour: 17,
            end_minute: 0,
            days: vec![0, 1, 2, 3, 4],
            timezone: tz.to_string(),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn inside_window_unchanged() {
        // Wednesday 2024-03-06 11:30 UTC.
        let candidate = utc(2024, 3, 6, 11, 30);
        let result = apply_business_hours(candidate, &window_9_to_17("UTC")).unwrap();
        assert_eq!(result, candidate);
    }

    #[test]
    fn before_opening_advances_to_start() {
        let candidate = utc(2024, 3, 6, 6, 0);
        let result = apply_business_hours(candidate, &window_9_to_17("UTC")).unwrap();
        assert_eq!(result, utc(2024, 3, 6, 9, 0));
    }

    #[test]
    fn after_close_advances_to_next_day() {
        let candidate = utc(2024, 3, 6, 18, 0);
        let result = apply_business_hours(candidate, &window_9_to_17("UTC")).unwrap();
        assert_eq!(result, utc(2024, 3, 7, 9, 0));
    }

    #[test]
    fn weekend_advances_to_monday() {
        // Saturday 2024-03-09.
        let candidate = utc(2024, 3, 9, 12, 0);
        let result = apply_business_hours(candidate, &window_9_to_17("UTC")).unwrap();
        assert_eq!(result, utc(2024, 3, 11, 9, 0));
    }

    #[test]
    fn idempotent_on_own_output() {
        let window = window_9_to_17("America/New_York");
        let candidate = utc(2024, 3, 9, 2, 0);
        let once = apply_business_hours(candidate, &window).unwrap();
        let twice = apply_business_hours(once, &window).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn exact_close_instant_is_outside() {
        // 17:00 is the first instant past the window.
        let candidate = utc(2024, 3, 6, 17, 0);
        let result = apply_business_hours(candidate, &window_9_to_17("UTC")).unwrap();
        assert_eq!(result, utc(2024, 3, 7, 9, 0));
    }

    #[test]
    fn inverted_window_rejected() {
        let mut window = window_9_to_17("UTC");
        window.end_hour = 8;
        assert!(apply_business_hours(Utc::now(), &window).is_err());
    }

    #[test]
    fn empty_days_rejected() {
        let mut window = window_9_to_17("UTC");
        window.days.clear();
        assert!(validate_business_hours(&window).is_err());
    }
}
