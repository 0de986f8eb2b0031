use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use crate::model::{Ms, Span};

pub const DAY_MS: Ms = 86_400_000;

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Midnight UTC of `date`.
pub fn date_to_ms(date: NaiveDate) -> Ms {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .timestamp_millis()
}

pub fn ms_to_date(ms: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

pub fn ms_to_rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Accepts `YYYY-MM-DD` (midnight UTC), RFC 3339, or integer unix millis.
pub fn parse_instant(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date_to_ms(date));
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// One closed span per calendar day of `year`/`month`:
/// `[midnight, next midnight - 1ms]`. None for an invalid month.
pub fn month_days(year: i32, month: u32) -> Option<Vec<Span>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let days = first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|d| {
            let start = date_to_ms(d);
            Span::new(start, start + DAY_MS - 1)
        })
        .collect();
    Some(days)
}

/// Calendar dates touched by `span`, first to last.
pub fn days_covered(span: &Span) -> Vec<NaiveDate> {
    let (Some(first), Some(last)) = (ms_to_date(span.start), ms_to_date(span.end)) else {
        return Vec::new();
    };
    first.iter_days().take_while(|d| *d <= last).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_is_midnight_utc() {
        let ms = parse_instant("2024-06-01").unwrap();
        assert_eq!(ms, 1_717_200_000_000);
        assert_eq!(ms_to_date(ms), NaiveDate::from_ymd_opt(2024, 6, 1));
    }

    #[test]
    fn parse_rfc3339_and_millis() {
        assert_eq!(parse_instant("2024-06-01T00:00:00Z"), Some(1_717_200_000_000));
        assert_eq!(parse_instant("2024-06-01T01:00:00+01:00"), Some(1_717_200_000_000));
        assert_eq!(parse_instant("1717200000000"), Some(1_717_200_000_000));
        assert_eq!(parse_instant("June 1st"), None);
    }

    #[test]
    fn month_days_february_leap_year() {
        let days = month_days(2024, 2).unwrap();
        assert_eq!(days.len(), 29);
        assert_eq!(days[0].end - days[0].start, DAY_MS - 1);
        assert_eq!(days[1].start, days[0].end + 1);
    }

    #[test]
    fn month_days_rejects_invalid_month() {
        assert!(month_days(2024, 13).is_none());
        assert!(month_days(2024, 0).is_none());
    }

    #[test]
    fn days_covered_includes_both_ends() {
        let start = parse_instant("2024-06-01").unwrap();
        let end = parse_instant("2024-06-03").unwrap();
        let days = days_covered(&Span::new(start, end));
        assert_eq!(days.len(), 3);
        assert_eq!(days[2], NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
    }
}
