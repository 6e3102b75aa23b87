use crate::query::error::QueryError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default ceiling on the number of time buckets a single query may produce.
pub const DEFAULT_MAX_BUCKETS: u64 = 1000;

/// Default bucket width for the raw time-bucketed query: one day.
pub const DEFAULT_BUCKET_SECS: u64 = 86_400;

/// Which visitors' events are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Population {
    #[default]
    All,
    Humans,
    Bots,
}

impl Population {
    /// Value bound to the `is_bot` predicate, or `None` when no predicate applies.
    pub const fn is_bot(self) -> Option<bool> {
        match self {
            Self::All => None,
            Self::Humans => Some(false),
            Self::Bots => Some(true),
        }
    }
}

/// What a query counts: every matching view, or the distinct visitors behind them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountTarget {
    #[default]
    Views,
    DistinctUsers,
}

/// The single dimension a query may be grouped by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupBy {
    #[default]
    None,
    Country,
    City,
    Region,
    Url,
    Domain,
    OperatingSystem,
    Device,
    DeviceType,
    Browser,
}

/// Temporal bucket granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    #[default]
    AllTime,
    Day,
    Week,
    Month,
    Year,
}

macro_rules! impl_wire_names {
    ($ty:ty, $label:literal, { $($name:literal => $variant:path),+ $(,)? }) => {
        impl $ty {
            /// The wire name used in API requests and responses.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = QueryError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(QueryError::InvalidQueryShape(format!(
                        "unknown {}: '{other}'",
                        $label
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_wire_names!(Population, "population", {
    "ALL" => Population::All,
    "HUMANS" => Population::Humans,
    "BOTS" => Population::Bots,
});

impl_wire_names!(CountTarget, "count target", {
    "VIEWS" => CountTarget::Views,
    "DISTINCT_USERS" => CountTarget::DistinctUsers,
});

impl_wire_names!(GroupBy, "group by", {
    "NONE" => GroupBy::None,
    "COUNTRY" => GroupBy::Country,
    "CITY" => GroupBy::City,
    "REGION" => GroupBy::Region,
    "URL" => GroupBy::Url,
    "DOMAIN" => GroupBy::Domain,
    "OPERATING_SYSTEM" => GroupBy::OperatingSystem,
    "DEVICE" => GroupBy::Device,
    "DEVICE_TYPE" => GroupBy::DeviceType,
    "BROWSER" => GroupBy::Browser,
});

impl_wire_names!(Resolution, "resolution", {
    "ALL_TIME" => Resolution::AllTime,
    "DAY" => Resolution::Day,
    "WEEK" => Resolution::Week,
    "MONTH" => Resolution::Month,
    "YEAR" => Resolution::Year,
});

/// Earliest date an unbounded query starts from.
pub fn min_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Exclusive end date of an unbounded query.
pub fn max_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Describes one aggregate query over the processed views.
///
/// "Views per week by country, bots only" is
/// `QueryDescriptor { population: Bots, group_by: Country, resolution: Week, .. }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    #[serde(default)]
    pub population: Population,
    #[serde(default)]
    pub count: CountTarget,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub resolution: Resolution,
    /// Inclusive start date. `None` means unbounded.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Exclusive end date. `None` means unbounded.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl QueryDescriptor {
    /// Resolve the `[start, end)` timestamp span, substituting the unbounded defaults.
    pub fn time_range(&self) -> Result<(NaiveDateTime, NaiveDateTime), QueryError> {
        let start = self.start_date.unwrap_or_else(min_date);
        let end = self.end_date.unwrap_or_else(max_date);
        if start > end {
            return Err(QueryError::InvalidQueryShape(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok((start.and_time(chrono::NaiveTime::MIN), end.and_time(chrono::NaiveTime::MIN)))
    }

    /// `true` when the query yields a single scalar count.
    pub fn is_scalar(&self) -> bool {
        self.resolution == Resolution::AllTime && self.group_by == GroupBy::None
    }
}

/// Query for the raw time-bucketed series, counted in fixed-width buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketQuery {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub population: Population,
}

const fn default_bucket_secs() -> u64 {
    DEFAULT_BUCKET_SECS
}

/// Resource ceilings applied before any query reaches the datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_buckets: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl QueryLimits {
    /// Reject a bucket count above the ceiling.
    pub fn check(&self, requested: u64) -> Result<(), QueryError> {
        if requested > self.max_buckets {
            return Err(QueryError::TooManyBuckets {
                requested,
                limit: self.max_buckets,
            });
        }
        Ok(())
    }
}
