use crate::query::descriptor::QueryLimits;
use crate::query::error::QueryError;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const MICROS_PER_SEC: i64 = 1_000_000;

/// One fixed-width time bucket and the per-key counts that fell into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub timestamp: NaiveDateTime,
    pub data: BTreeMap<String, u64>,
}

/// Serialized accumulator output.
///
/// `all_keys` lists every key incremented in any bucket, so clients can
/// zero-fill buckets that never saw a given key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSeries {
    pub all_keys: Vec<String>,
    pub buckets: Vec<Bucket>,
}

/// Counts events into `ceil((end - start) / width)` contiguous buckets.
#[derive(Debug)]
pub struct BucketAccumulator {
    start: NaiveDateTime,
    end: NaiveDateTime,
    width_micros: i64,
    buckets: Vec<Bucket>,
    keys: BTreeSet<String>,
}

impl BucketAccumulator {
    /// Pre-allocate every bucket in `[start, end)`.
    ///
    /// Fails before allocating anything when the bucket count exceeds the ceiling.
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        bucket_secs: u64,
        limits: &QueryLimits,
    ) -> Result<Self, QueryError> {
        if bucket_secs == 0 {
            return Err(QueryError::InvalidQueryShape(
                "bucket width must be at least one second".to_string(),
            ));
        }
        if end < start {
            return Err(QueryError::InvalidQueryShape(format!(
                "start time {start} is after end time {end}"
            )));
        }
        let width_micros = i64::try_from(bucket_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(MICROS_PER_SEC))
            .ok_or_else(|| {
                QueryError::InvalidQueryShape(format!("bucket width {bucket_secs}s is too large"))
            })?;
        let span_micros = (end - start).num_microseconds().ok_or_else(|| {
            QueryError::InvalidQueryShape(format!("range {start} .. {end} is too large"))
        })?;

        let count = span_micros / width_micros + i64::from(span_micros % width_micros != 0);
        let count = u64::try_from(count).unwrap_or(0);
        limits.check(count)?;

        // Bucket starts are derived from the index so the range end is never
        // stepped past; a huge width with a short range yields one bucket.
        let buckets = (0..count)
            .map(|i| {
                let timestamp = i64::try_from(i)
                    .ok()
                    .and_then(|i| width_micros.checked_mul(i))
                    .and_then(|offset| start.checked_add_signed(TimeDelta::microseconds(offset)))
                    .ok_or_else(|| {
                        QueryError::InvalidQueryShape(format!(
                            "bucket {i} of width {bucket_secs}s overflows the calendar"
                        ))
                    })?;
                Ok(Bucket {
                    timestamp,
                    data: BTreeMap::new(),
                })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        Ok(Self {
            start,
            end,
            width_micros,
            buckets,
            keys: BTreeSet::new(),
        })
    }

    /// Count one event for `key` in the bucket containing `timestamp`.
    pub fn increment(&mut self, key: &str, timestamp: NaiveDateTime) -> Result<(), QueryError> {
        let (start, end) = (self.start, self.end);
        let out_of_range = || QueryError::OutOfRange {
            timestamp,
            start,
            end,
        };
        if timestamp < start || timestamp >= end {
            return Err(out_of_range());
        }
        let offset = (timestamp - start)
            .num_microseconds()
            .ok_or_else(out_of_range)?;
        let index = usize::try_from(offset / self.width_micros).map_err(|_| out_of_range())?;
        let Some(bucket) = self.buckets.get_mut(index) else {
            return Err(out_of_range());
        };

        if let Some(count) = bucket.data.get_mut(key) {
            *count += 1;
        } else {
            bucket.data.insert(key.to_string(), 1);
        }
        if !self.keys.contains(key) {
            self.keys.insert(key.to_string());
        }
        Ok(())
    }

    /// Number of pre-allocated buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` for an empty time range.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Consume the accumulator into its response form, buckets in time order.
    pub fn serialize(self) -> BucketSeries {
        BucketSeries {
            all_keys: self.keys.into_iter().collect(),
            buckets: self.buckets,
        }
    }
}
