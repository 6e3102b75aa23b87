use crate::query::buckets::{BucketAccumulator, BucketSeries};
use crate::query::columns::{ColumnRole, TIMESTAMP_FORMAT};
use crate::query::descriptor::{BucketQuery, QueryDescriptor, QueryLimits};
use crate::query::error::QueryError;
use crate::query::generator::{self, GeneratedSql, ParamValue};
use chrono::NaiveDateTime;
use duckdb::types::Value;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// A single positional value read back from the datastore.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

/// Executes generated SQL and returns its rows.
///
/// Implementations must make exactly one round trip per call and return the
/// rows in the order the datastore produced them.
pub trait QueryExecutor {
    fn fetch_rows(&self, query: &GeneratedSql) -> Result<Vec<Vec<Cell>>, QueryError>;
}

impl QueryExecutor for Connection {
    fn fetch_rows(&self, query: &GeneratedSql) -> Result<Vec<Vec<Cell>>, QueryError> {
        let params: Vec<Value> = query
            .params
            .iter()
            .map(|param| match param.value {
                ParamValue::Timestamp(ts) => Value::Text(ParamValue::render_timestamp(ts)),
                ParamValue::Bool(b) => Value::Boolean(b),
            })
            .collect();

        let width = query.columns.len();
        let mut stmt = self.prepare(&query.sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(to_cell(row.get::<_, Value>(idx)?)?);
            }
            out.push(cells);
        }
        Ok(out)
    }
}

fn to_cell(value: Value) -> Result<Cell, QueryError> {
    let cell = match value {
        Value::Null => Cell::Null,
        Value::TinyInt(v) => Cell::Int(i64::from(v)),
        Value::SmallInt(v) => Cell::Int(i64::from(v)),
        Value::Int(v) => Cell::Int(i64::from(v)),
        Value::BigInt(v) => Cell::Int(v),
        Value::UTinyInt(v) => Cell::Int(i64::from(v)),
        Value::USmallInt(v) => Cell::Int(i64::from(v)),
        Value::UInt(v) => Cell::Int(i64::from(v)),
        Value::UBigInt(v) => Cell::Int(
            i64::try_from(v).map_err(|_| QueryError::InvalidRow(format!("{v} overflows i64")))?,
        ),
        Value::HugeInt(v) => Cell::Int(
            i64::try_from(v).map_err(|_| QueryError::InvalidRow(format!("{v} overflows i64")))?,
        ),
        Value::Float(v) => Cell::Float(f64::from(v)),
        Value::Double(v) => Cell::Float(v),
        Value::Text(s) => Cell::Text(s),
        other => {
            return Err(QueryError::InvalidRow(format!(
                "unsupported column value {other:?}"
            )))
        }
    };
    Ok(cell)
}

/// One aggregate result: a count, optionally with a bucket date and a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub quantity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Generate, execute and materialize an aggregate query.
///
/// The executor is never called when generation fails.
pub fn run<E: QueryExecutor + ?Sized>(
    executor: &E,
    query: &QueryDescriptor,
    limits: &QueryLimits,
) -> Result<Vec<ResultRecord>, QueryError> {
    let generated = generator::generate(query, limits)?;
    let rows = executor.fetch_rows(&generated)?;
    tracing::debug!(
        resolution = %generated.resolution,
        rows = rows.len(),
        "Aggregate query executed"
    );
    rows.iter().map(|row| materialize(&generated, row)).collect()
}

/// Stream raw events of a bucket query through a [`BucketAccumulator`].
pub fn run_bucketed<E: QueryExecutor + ?Sized>(
    executor: &E,
    query: &BucketQuery,
    limits: &QueryLimits,
) -> Result<BucketSeries, QueryError> {
    let mut acc =
        BucketAccumulator::new(query.start_time, query.end_time, query.bucket_secs, limits)?;
    let generated = generator::generate_events(query)?;
    let rows = executor.fetch_rows(&generated)?;

    for row in &rows {
        let mut key = None;
        let mut event_time = None;
        check_width(&generated, row)?;
        for (role, cell) in generated.columns.iter().zip(row) {
            match role {
                ColumnRole::GroupKey => key = Some(text_cell(cell, *role)?),
                ColumnRole::EventTime => event_time = Some(time_cell(cell)?),
                other => {
                    return Err(QueryError::InvalidRow(format!(
                        "unexpected column '{}' in event row",
                        other.alias()
                    )))
                }
            }
        }
        match (key, event_time) {
            (Some(key), Some(ts)) => acc.increment(&key, ts)?,
            _ => {
                return Err(QueryError::InvalidRow(
                    "event row needs a key and a time".to_string(),
                ))
            }
        }
    }
    Ok(acc.serialize())
}

fn materialize(generated: &GeneratedSql, row: &[Cell]) -> Result<ResultRecord, QueryError> {
    check_width(generated, row)?;

    let mut quantity = None;
    let mut key = None;
    let mut year_part = None;
    let mut sub_part = None;
    for (role, cell) in generated.columns.iter().zip(row) {
        match role {
            ColumnRole::Quantity => {
                let count = int_cell(cell, *role)?;
                quantity = Some(u64::try_from(count).map_err(|_| {
                    QueryError::InvalidRow(format!("negative count {count}"))
                })?);
            }
            ColumnRole::GroupKey => key = Some(text_cell(cell, *role)?),
            ColumnRole::YearPart => year_part = Some(int_cell(cell, *role)?),
            ColumnRole::SubPart => sub_part = Some(int_cell(cell, *role)?),
            ColumnRole::EventTime => {
                return Err(QueryError::InvalidRow(
                    "unexpected event_time column in aggregate row".to_string(),
                ))
            }
        }
    }

    let quantity =
        quantity.ok_or_else(|| QueryError::InvalidRow("row has no quantity".to_string()))?;
    let date = generated.resolution.bucket_start(year_part, sub_part)?;
    Ok(ResultRecord {
        quantity,
        date,
        key,
    })
}

fn check_width(generated: &GeneratedSql, row: &[Cell]) -> Result<(), QueryError> {
    if row.len() != generated.columns.len() {
        return Err(QueryError::InvalidRow(format!(
            "expected {} columns, got {}",
            generated.columns.len(),
            row.len()
        )));
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn int_cell(cell: &Cell, role: ColumnRole) -> Result<i64, QueryError> {
    match cell {
        Cell::Int(v) => Ok(*v),
        // Calendar parts may come back as DOUBLE from some extraction functions.
        Cell::Float(v) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i64),
        other => Err(QueryError::InvalidRow(format!(
            "column '{}' is not an integer: {other:?}",
            role.alias()
        ))),
    }
}

fn text_cell(cell: &Cell, role: ColumnRole) -> Result<String, QueryError> {
    match cell {
        Cell::Text(s) => Ok(s.clone()),
        other => Err(QueryError::InvalidRow(format!(
            "column '{}' is not text: {other:?}",
            role.alias()
        ))),
    }
}

fn time_cell(cell: &Cell) -> Result<NaiveDateTime, QueryError> {
    let Cell::Text(s) = cell else {
        return Err(QueryError::InvalidRow(format!(
            "event time is not text: {cell:?}"
        )));
    };
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| QueryError::InvalidRow(format!("bad event time '{s}': {e}")))
}
