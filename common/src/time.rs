//! Time utilities and accounting periods for NyumbaPay.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A timestamp with timezone (always UTC for NyumbaPay).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Error for an impossible period request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period: {0}")]
pub struct InvalidPeriod(pub String);

/// Kind of accounting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Monthly,
    Quarterly,
    Annual,
    Custom,
}

/// A closed period `[start, end]` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub period_type: PeriodType,
    pub start: Timestamp,
    pub end: Timestamp,
}

fn start_of_day(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn end_of_day(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(
        &date
            .and_hms_milli_opt(23, 59, 59, 999)
            .expect("end of day is valid"),
    )
}

fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate, InvalidPeriod> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| InvalidPeriod(format!("{year}-{month:02} is not a month")))?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("successor month exists");
    Ok(next_first.pred_opt().unwrap_or(first))
}

impl Period {
    /// Calendar month: `[y-m-01 00:00, y-m-last 23:59:59.999]`.
    pub fn monthly(year: i32, month: u32) -> Result<Self, InvalidPeriod> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| InvalidPeriod(format!("{year}-{month:02} is not a month")))?;
        Ok(Self {
            period_type: PeriodType::Monthly,
            start: start_of_day(first),
            end: end_of_day(last_day_of_month(year, month)?),
        })
    }

    /// Calendar quarter (1-4).
    pub fn quarterly(year: i32, quarter: u32) -> Result<Self, InvalidPeriod> {
        if !(1..=4).contains(&quarter) {
            return Err(InvalidPeriod(format!("quarter {quarter} out of range")));
        }
        let first_month = (quarter - 1) * 3 + 1;
        let first = NaiveDate::from_ymd_opt(year, first_month, 1)
            .ok_or_else(|| InvalidPeriod(format!("{year}-Q{quarter}")))?;
        Ok(Self {
            period_type: PeriodType::Quarterly,
            start: start_of_day(first),
            end: end_of_day(last_day_of_month(year, first_month + 2)?),
        })
    }

    /// Calendar year.
    pub fn annual(year: i32) -> Result<Self, InvalidPeriod> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| InvalidPeriod(format!("year {year}")))?;
        Ok(Self {
            period_type: PeriodType::Annual,
            start: start_of_day(first),
            end: end_of_day(last_day_of_month(year, 12)?),
        })
    }

    /// Custom bounds, accepted verbatim.
    pub fn custom(start: Timestamp, end: Timestamp) -> Result<Self, InvalidPeriod> {
        if end < start {
            return Err(InvalidPeriod("period end precedes start".to_string()));
        }
        Ok(Self {
            period_type: PeriodType::Custom,
            start,
            end,
        })
    }

    /// Whether `t` falls within the period (inclusive bounds).
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// The instant one millisecond before the period opens; used for
    /// opening-balance queries.
    pub fn instant_before_start(&self) -> Timestamp {
        self.start - Duration::milliseconds(1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Calendar-day distance between two timestamps, ignoring time of day.
pub fn calendar_day_distance(a: Timestamp, b: Timestamp) -> i64 {
    (a.date_naive() - b.date_naive()).num_days().abs()
}

/// Whether two timestamps fall on the same calendar day.
pub fn same_calendar_day(a: Timestamp, b: Timestamp) -> bool {
    a.date_naive() == b.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn monthly_period_bounds() {
        let p = Period::monthly(2026, 2).unwrap();
        assert_eq!(p.start.to_rfc3339(), "2026-02-01T00:00:00+00:00");
        assert_eq!(p.end.day(), 28);
        assert_eq!(p.end.format("%H:%M:%S%.3f").to_string(), "23:59:59.999");
    }

    #[test]
    fn monthly_handles_leap_years_and_december() {
        assert_eq!(Period::monthly(2024, 2).unwrap().end.day(), 29);
        let dec = Period::monthly(2026, 12).unwrap();
        assert_eq!(dec.end.day(), 31);
        assert_eq!(dec.end.month(), 12);
    }

    #[test]
    fn quarterly_and_annual_bounds() {
        let q4 = Period::quarterly(2026, 4).unwrap();
        assert_eq!(q4.start.month(), 10);
        assert_eq!(q4.end.month(), 12);
        assert!(Period::quarterly(2026, 5).is_err());

        let y = Period::annual(2026).unwrap();
        assert_eq!(y.start.month(), 1);
        assert_eq!(y.end.month(), 12);
    }

    #[test]
    fn custom_rejects_inverted_bounds() {
        let t = now();
        assert!(Period::custom(t, t - Duration::seconds(1)).is_err());
    }

    #[test]
    fn instant_before_start_is_one_millisecond_earlier() {
        let p = Period::monthly(2026, 3).unwrap();
        assert_eq!(p.start - p.instant_before_start(), Duration::milliseconds(1));
        assert!(!p.contains(p.instant_before_start()));
        assert!(p.contains(p.start));
        assert!(p.contains(p.end));
    }

    #[test]
    fn day_distance() {
        let p = Period::monthly(2026, 2).unwrap();
        let a = p.start + Duration::hours(23);
        let b = p.start + Duration::hours(25);
        assert!(same_calendar_day(a, p.start));
        assert!(!same_calendar_day(b, p.start));
        assert_eq!(calendar_day_distance(a, b), 1);
    }
}
