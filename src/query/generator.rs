use crate::query::columns::{
    group_key_expr, ColumnRole, ALL_KEY, PROCESSED_VIEWS_TABLE, TIMESTAMP_FORMAT,
};
use crate::query::descriptor::{
    BucketQuery, Population, QueryDescriptor, QueryLimits, Resolution,
};
use crate::query::error::QueryError;
use chrono::NaiveDateTime;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    Timestamp(NaiveDateTime),
    Bool(bool),
}

/// A named binding. Bindings are listed in placeholder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParam {
    pub name: &'static str,
    pub value: ParamValue,
}

/// SQL text plus everything needed to execute it and read its rows back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSql {
    pub sql: String,
    pub params: Vec<QueryParam>,
    /// Meaning of each positional result column.
    pub columns: Vec<ColumnRole>,
    /// Resolution the calendar columns were extracted at.
    pub resolution: Resolution,
}

/// Build the aggregate SQL for a query descriptor.
///
/// Pure: the same descriptor always yields the same SQL and bindings. The
/// bucket ceiling is enforced here, so an oversized query never reaches the
/// datastore.
pub fn generate(query: &QueryDescriptor, limits: &QueryLimits) -> Result<GeneratedSql, QueryError> {
    let (start, end) = query.time_range()?;
    if query.resolution != Resolution::AllTime {
        limits.check(query.resolution.bucket_count(start, end))?;
    }

    let group_column = query.group_by.column();
    let calendar = query.resolution.calendar_terms();

    let mut columns = vec![ColumnRole::Quantity];
    let mut select = vec![format!(
        "{} AS {}",
        query.count.count_expr(),
        ColumnRole::Quantity.alias()
    )];
    if let Some(column) = group_column {
        columns.push(ColumnRole::GroupKey);
        select.push(format!(
            "{} AS {}",
            group_key_expr(column),
            ColumnRole::GroupKey.alias()
        ));
    }
    for (role, expr) in calendar {
        columns.push(*role);
        select.push(format!("{expr} AS {}", role.alias()));
    }

    // Calendar terms first, then the grouping key.
    let mut grouping: Vec<&str> = calendar.iter().map(|(role, _)| role.alias()).collect();
    if group_column.is_some() {
        grouping.push(ColumnRole::GroupKey.alias());
    }

    let (where_clause, params) = where_clause(start, end, query.population);
    let mut sql = format!(
        "SELECT {} FROM {PROCESSED_VIEWS_TABLE} WHERE {where_clause}",
        select.join(", ")
    );
    if !grouping.is_empty() {
        let order = if calendar.is_empty() {
            // Grouping only: largest groups first, key as tie-break.
            format!(
                "{} DESC, {}",
                ColumnRole::Quantity.alias(),
                ColumnRole::GroupKey.alias()
            )
        } else {
            grouping.join(", ")
        };
        sql.push_str(&format!(" GROUP BY {} ORDER BY {order}", grouping.join(", ")));
    }

    Ok(GeneratedSql {
        sql,
        params,
        columns,
        resolution: query.resolution,
    })
}

/// Build the per-event SQL feeding the fixed-width bucket accumulator.
///
/// Yields one `(group_key, event_time)` row per matching view in time order.
pub fn generate_events(query: &BucketQuery) -> Result<GeneratedSql, QueryError> {
    if query.end_time < query.start_time {
        return Err(QueryError::InvalidQueryShape(format!(
            "start time {} is after end time {}",
            query.start_time, query.end_time
        )));
    }

    let key_expr = query
        .group_by
        .column()
        .map_or_else(|| format!("'{ALL_KEY}'"), group_key_expr);
    let (where_clause, params) = where_clause(query.start_time, query.end_time, query.population);
    let sql = format!(
        "SELECT {key_expr} AS {}, strftime(timestamp, '%Y-%m-%d %H:%M:%S.%f') AS {} \
         FROM {PROCESSED_VIEWS_TABLE} WHERE {where_clause} ORDER BY timestamp",
        ColumnRole::GroupKey.alias(),
        ColumnRole::EventTime.alias(),
    );

    Ok(GeneratedSql {
        sql,
        params,
        columns: vec![ColumnRole::GroupKey, ColumnRole::EventTime],
        resolution: Resolution::AllTime,
    })
}

fn where_clause(
    start: NaiveDateTime,
    end: NaiveDateTime,
    population: Population,
) -> (String, Vec<QueryParam>) {
    let mut clause =
        "timestamp >= CAST(? AS TIMESTAMP) AND timestamp < CAST(? AS TIMESTAMP)".to_string();
    let mut params = vec![
        QueryParam {
            name: "start",
            value: ParamValue::Timestamp(start),
        },
        QueryParam {
            name: "end",
            value: ParamValue::Timestamp(end),
        },
    ];
    if let Some(is_bot) = population.is_bot() {
        clause.push_str(" AND is_bot = ?");
        params.push(QueryParam {
            name: "is_bot",
            value: ParamValue::Bool(is_bot),
        });
    }
    (clause, params)
}

impl ParamValue {
    /// Text rendering of timestamps as DuckDB casts them.
    pub fn render_timestamp(ts: NaiveDateTime) -> String {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }
}
