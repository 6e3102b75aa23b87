//! Reconstruction of bucket start dates from the calendar parts DuckDB extracts.
//!
//! Week buckets follow ISO-8601 on both sides: DuckDB's `isoyear()`/`week()`
//! extract them, and [`from_iso_week`] maps them back to the Monday that
//! starts the week. Mixing in a `%W`-style week number would shift late
//! December and early January buckets by a week.

use crate::query::descriptor::Resolution;
use crate::query::error::QueryError;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn positive_component<T: TryFrom<i64>>(value: i64, what: &str) -> Result<T, QueryError> {
    if value <= 0 {
        return Err(QueryError::InvalidDate(format!(
            "{what} must be positive, got {value}"
        )));
    }
    T::try_from(value)
        .map_err(|_| QueryError::InvalidDate(format!("{what} {value} is out of range")))
}

/// Start of the `day_of_year`-th day (1-based) of `year`.
pub fn from_day_of_year(year: i64, day_of_year: i64) -> Result<NaiveDateTime, QueryError> {
    let year: i32 = positive_component(year, "year")?;
    let day: u32 = positive_component(day_of_year, "day of year")?;
    NaiveDate::from_yo_opt(year, day)
        .map(midnight)
        .ok_or_else(|| QueryError::InvalidDate(format!("day {day} does not exist in {year}")))
}

/// Monday of ISO week `iso_week` in ISO year `iso_year`.
pub fn from_iso_week(iso_year: i64, iso_week: i64) -> Result<NaiveDateTime, QueryError> {
    let year: i32 = positive_component(iso_year, "ISO year")?;
    let week: u32 = positive_component(iso_week, "ISO week")?;
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
        .map(midnight)
        .ok_or_else(|| QueryError::InvalidDate(format!("ISO year {year} has no week {week}")))
}

/// First day of `month` in `year`.
pub fn from_month(year: i64, month: i64) -> Result<NaiveDateTime, QueryError> {
    let year: i32 = positive_component(year, "year")?;
    let month: u32 = positive_component(month, "month")?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(midnight)
        .ok_or_else(|| QueryError::InvalidDate(format!("month {month} does not exist")))
}

/// January 1st of `year`.
pub fn from_year(year: i64) -> Result<NaiveDateTime, QueryError> {
    let year: i32 = positive_component(year, "year")?;
    NaiveDate::from_ymd_opt(year, 1, 1)
        .map(midnight)
        .ok_or_else(|| QueryError::InvalidDate(format!("year {year} is out of range")))
}

impl Resolution {
    /// Position of the bucket containing `date` on a monotonic bucket axis.
    fn bucket_ordinal(self, date: NaiveDate) -> i64 {
        match self {
            Self::AllTime => 0,
            Self::Day => i64::from(date.num_days_from_ce()),
            // Mondays are exactly 7 days apart, so week ordinals stay contiguous
            // across ISO year boundaries.
            Self::Week => {
                let monday =
                    date - TimeDelta::days(i64::from(date.weekday().num_days_from_monday()));
                i64::from(monday.num_days_from_ce()).div_euclid(7)
            }
            Self::Month => i64::from(date.year()) * 12 + i64::from(date.month0()),
            Self::Year => i64::from(date.year()),
        }
    }

    /// Start of the bucket identified by the extracted calendar parts.
    ///
    /// Returns `Ok(None)` for `AllTime`, which has no bucket date.
    pub fn bucket_start(
        self,
        year_part: Option<i64>,
        sub_part: Option<i64>,
    ) -> Result<Option<NaiveDateTime>, QueryError> {
        let missing = || QueryError::InvalidDate(format!("{self} bucket is missing a calendar part"));
        let start = match self {
            Self::AllTime => return Ok(None),
            Self::Year => from_year(year_part.ok_or_else(missing)?)?,
            Self::Day => from_day_of_year(
                year_part.ok_or_else(missing)?,
                sub_part.ok_or_else(missing)?,
            )?,
            Self::Week => from_iso_week(
                year_part.ok_or_else(missing)?,
                sub_part.ok_or_else(missing)?,
            )?,
            Self::Month => from_month(
                year_part.ok_or_else(missing)?,
                sub_part.ok_or_else(missing)?,
            )?,
        };
        Ok(Some(start))
    }

    /// Number of calendar buckets that `[start, end)` touches at this resolution.
    ///
    /// `AllTime` always counts as one bucket; an empty range has none.
    pub fn bucket_count(self, start: NaiveDateTime, end: NaiveDateTime) -> u64 {
        if end <= start {
            return 0;
        }
        if self == Self::AllTime {
            return 1;
        }
        let last = (end - TimeDelta::nanoseconds(1)).date();
        let span = self.bucket_ordinal(last) - self.bucket_ordinal(start.date()) + 1;
        u64::try_from(span).unwrap_or(0)
    }
}
