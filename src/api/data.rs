use crate::api::errors::ApiError;
use crate::query::cache::QueryCache;
use crate::query::{runner, BucketQuery, BucketSeries, QueryDescriptor, QueryError, ResultRecord};
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Query-string form of a [`QueryDescriptor`].
///
/// Enum names are matched case-insensitively; omitted fields take their defaults.
#[derive(Debug, Default, Deserialize)]
pub struct DataQueryParams {
    pub population: Option<String>,
    pub count: Option<String>,
    pub group_by: Option<String>,
    pub resolution: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Query-string form of a [`BucketQuery`].
#[derive(Debug, Default, Deserialize)]
pub struct BucketParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub bucket_secs: Option<u64>,
    pub group_by: Option<String>,
    pub population: Option<String>,
}

fn parse_or_default<T: FromStr<Err = QueryError> + Default>(
    value: Option<&str>,
) -> Result<T, QueryError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| Ok(T::default()), |v| v.trim().parse())
}

fn parse_date(name: &str, value: Option<&str>) -> Result<Option<NaiveDate>, QueryError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| QueryError::InvalidDate(format!("{name} '{v}': {e}"))),
    }
}

/// Accepts a full timestamp or a bare date (midnight).
fn parse_time(name: &str, value: Option<&str>) -> Result<NaiveDateTime, QueryError> {
    let v = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| QueryError::InvalidQueryShape(format!("{name} is required")))?;
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(v, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .ok_or_else(|| QueryError::InvalidDate(format!("{name} '{v}' is not a timestamp")))
}

impl DataQueryParams {
    pub fn to_descriptor(&self) -> Result<QueryDescriptor, QueryError> {
        Ok(QueryDescriptor {
            population: parse_or_default(self.population.as_deref())?,
            count: parse_or_default(self.count.as_deref())?,
            group_by: parse_or_default(self.group_by.as_deref())?,
            resolution: parse_or_default(self.resolution.as_deref())?,
            start_date: parse_date("start_date", self.start_date.as_deref())?,
            end_date: parse_date("end_date", self.end_date.as_deref())?,
        })
    }
}

impl BucketParams {
    pub fn to_bucket_query(&self) -> Result<BucketQuery, QueryError> {
        Ok(BucketQuery {
            start_time: parse_time("start_time", self.start_time.as_deref())?,
            end_time: parse_time("end_time", self.end_time.as_deref())?,
            bucket_secs: self
                .bucket_secs
                .unwrap_or(crate::query::descriptor::DEFAULT_BUCKET_SECS),
            group_by: parse_or_default(self.group_by.as_deref())?,
            population: parse_or_default(self.population.as_deref())?,
        })
    }
}

fn cached<T: DeserializeOwned>(state: &AppState, key: Option<&str>) -> Option<T> {
    let cached = state.query_cache.get(key?)?;
    serde_json::from_str(&cached).ok()
}

/// Cache `value` unless processing cleared the cache while it was computed.
fn store<T: Serialize>(state: &AppState, generation: u64, key: Option<String>, value: &T) {
    if let (Some(key), Ok(serialized)) = (key, serde_json::to_string(value)) {
        if !state.query_cache.insert_at(generation, key, serialized) {
            tracing::debug!("Discarded result computed before cache invalidation");
        }
    }
}

/// GET /api/v1/data/query: Aggregate counts for a query descriptor.
pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DataQueryParams>,
) -> Result<Json<Vec<ResultRecord>>, ApiError> {
    let descriptor = params.to_descriptor()?;
    let cache_key = QueryCache::key_for("query", &descriptor);
    if let Some(records) = cached(&state, cache_key.as_deref()) {
        return Ok(Json(records));
    }

    let generation = state.query_cache.generation();
    let state2 = Arc::clone(&state);
    let records = tokio::task::spawn_blocking(move || {
        let conn = state2.conn.lock();
        runner::run(&*conn, &descriptor, &state2.limits)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;

    store(&state, generation, cache_key, &records);
    Ok(Json(records))
}

/// GET /api/v1/data/buckets: Fixed-width time-bucketed counts per key.
pub async fn get_buckets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BucketParams>,
) -> Result<Json<BucketSeries>, ApiError> {
    let query = params.to_bucket_query()?;
    let cache_key = QueryCache::key_for("buckets", &query);
    if let Some(series) = cached(&state, cache_key.as_deref()) {
        return Ok(Json(series));
    }

    let generation = state.query_cache.generation();
    let state2 = Arc::clone(&state);
    let series = tokio::task::spawn_blocking(move || {
        let conn = state2.conn.lock();
        runner::run_bucketed(&*conn, &query, &state2.limits)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;

    store(&state, generation, cache_key, &series);
    Ok(Json(series))
}
