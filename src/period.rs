//! Period bucketing.
//!
//! Every run is assigned to exactly one half-open window `[start, end)` per
//! [`PeriodType`]. Windows of one period type are contiguous and never overlap,
//! and a timestamp that falls exactly on a boundary belongs to the window that
//! starts at that instant. All windows are computed in UTC.
use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default first day of a weekly window.
pub const DEFAULT_WEEK_START: Weekday = Weekday::Mon;

/// The granularity of a trend period.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    /// A UTC calendar day.
    #[value(alias = "day")]
    Daily,
    /// Seven days starting at the configured first day of the week.
    #[value(alias = "week")]
    Weekly,
    /// A UTC calendar month.
    #[value(alias = "month")]
    Monthly,
}

impl FromStr for PeriodType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            _ => Err(Error::InvalidPeriodType(s.to_string())),
        }
    }
}

impl PeriodType {
    /// Returns the window containing `at`, with weeks starting on Monday.
    pub fn bucket(self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        bucket_with(at, self, DEFAULT_WEEK_START)
    }

    /// Format used for chart labels of this period type.
    pub(crate) fn label_format(self) -> &'static str {
        match self {
            Self::Daily | Self::Weekly => "%Y-%m-%d",
            Self::Monthly => "%Y-%m",
        }
    }
}

/// Returns the `[start, end)` window of `period_type` containing `executed_at`.
///
/// Weekly windows start on Monday 00:00 UTC.
pub fn bucket(executed_at: DateTime<Utc>, period_type: PeriodType) -> (DateTime<Utc>, DateTime<Utc>) {
    bucket_with(executed_at, period_type, DEFAULT_WEEK_START)
}

/// Like [`bucket`], with an explicit first day of the week for weekly windows.
pub fn bucket_with(
    executed_at: DateTime<Utc>,
    period_type: PeriodType,
    week_start: Weekday,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = executed_at.date_naive();
    let (start, end) = match period_type {
        PeriodType::Daily => (date, date + Days::new(1)),
        PeriodType::Weekly => {
            let offset = (7 + date.weekday().num_days_from_monday() - week_start.num_days_from_monday()) % 7;
            let start = date - Days::new(offset.into());
            (start, start + Days::new(7))
        }
        PeriodType::Monthly => {
            let start = date - Days::new(date.day0().into());
            (start, start + Months::new(1))
        }
    };
    (midnight(start), midnight(end))
}

/// Parses a period type, failing with [`Error::InvalidPeriodType`] for unknown values.
pub fn parse_period_type(s: &str) -> crate::Result<PeriodType> {
    s.parse()
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Identifies one trend series: a prompt evaluated by a suite against a model,
/// bucketed by one period type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// The benchmarked prompt.
    pub prompt_id: String,
    /// The benchmark suite.
    pub suite_id: String,
    /// The evaluated model.
    pub model_id: String,
    /// The period granularity.
    pub period_type: PeriodType,
}

impl SeriesKey {
    /// Returns the key of the period of this series containing `at`.
    pub fn period_at(&self, at: DateTime<Utc>, week_start: Weekday) -> PeriodKey {
        let (period_start, period_end) = bucket_with(at, self.period_type, week_start);
        PeriodKey { series: self.clone(), period_start, period_end }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.prompt_id, self.suite_id, self.model_id, self.period_type)
    }
}

/// Identifies one period of one series. `period_end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey {
    /// The series this period belongs to.
    #[serde(flatten)]
    pub series: SeriesKey,
    /// Inclusive start of the window.
    pub period_start: DateTime<Utc>,
    /// Exclusive end of the window.
    pub period_end: DateTime<Utc>,
}

impl PeriodKey {
    /// Returns true if `at` falls inside this window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.period_start <= at && at < self.period_end
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.series, self.period_start.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn daily_window() {
        let (start, end) = bucket(utc(2024, 3, 6, 23, 59, 59), PeriodType::Daily);
        assert_eq!(start, utc(2024, 3, 6, 0, 0, 0));
        assert_eq!(end, utc(2024, 3, 7, 0, 0, 0));
    }

    #[test]
    fn weekly_window_starts_on_monday() {
        // 2024-03-06 is a Wednesday.
        let (start, end) = bucket(utc(2024, 3, 6, 8, 0, 0), PeriodType::Weekly);
        assert_eq!(start, utc(2024, 3, 4, 0, 0, 0));
        assert_eq!(end, utc(2024, 3, 11, 0, 0, 0));

        // Sunday still belongs to the week that started the previous Monday.
        let (start, _) = bucket(utc(2024, 3, 10, 23, 0, 0), PeriodType::Weekly);
        assert_eq!(start, utc(2024, 3, 4, 0, 0, 0));
    }

    #[test]
    fn weekly_window_custom_week_start() {
        let (start, end) = bucket_with(utc(2024, 3, 6, 8, 0, 0), PeriodType::Weekly, Weekday::Sun);
        assert_eq!(start, utc(2024, 3, 3, 0, 0, 0));
        assert_eq!(end, utc(2024, 3, 10, 0, 0, 0));
    }

    #[test]
    fn monthly_window_handles_year_end_and_leap_day() {
        let (start, end) = bucket(utc(2023, 12, 31, 23, 0, 0), PeriodType::Monthly);
        assert_eq!(start, utc(2023, 12, 1, 0, 0, 0));
        assert_eq!(end, utc(2024, 1, 1, 0, 0, 0));

        let (start, end) = bucket(utc(2024, 2, 29, 10, 0, 0), PeriodType::Monthly);
        assert_eq!(start, utc(2024, 2, 1, 0, 0, 0));
        assert_eq!(end, utc(2024, 3, 1, 0, 0, 0));
    }

    #[test]
    fn boundary_belongs_to_the_period_it_starts() {
        let boundary = utc(2024, 3, 11, 0, 0, 0);
        let (start, _) = bucket(boundary, PeriodType::Weekly);
        assert_eq!(start, boundary);
        let (start, _) = bucket(utc(2024, 4, 1, 0, 0, 0), PeriodType::Monthly);
        assert_eq!(start, utc(2024, 4, 1, 0, 0, 0));
    }

    #[test]
    fn parse_period_type_accepts_aliases() {
        assert_eq!("daily".parse::<PeriodType>().unwrap(), PeriodType::Daily);
        assert_eq!("Week".parse::<PeriodType>().unwrap(), PeriodType::Weekly);
        assert_eq!(parse_period_type("month").unwrap(), PeriodType::Monthly);
        assert_eq!(parse_period_type("hourly"), Err(Error::InvalidPeriodType("hourly".into())));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for p in [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly] {
            assert_eq!(p.to_string().parse::<PeriodType>().unwrap(), p);
        }
    }

    proptest! {
        #[test]
        fn every_timestamp_maps_to_one_contiguous_window(secs in 0i64..4_102_444_800, kind in 0usize..3) {
            let period = [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly][kind];
            let at = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let (start, end) = bucket(at, period);
            prop_assert!(start <= at && at < end);
            // The next window starts exactly where this one ends.
            let (next_start, _) = bucket(end, period);
            prop_assert_eq!(next_start, end);
            // Bucketing the start maps to the same window.
            prop_assert_eq!(bucket(start, period), (start, end));
        }
    }
}
