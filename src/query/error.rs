use chrono::NaiveDateTime;

/// Errors raised while building, executing or materializing an aggregate query.
///
/// Every variant is local to a single request; none of them leave shared state behind.
#[derive(Debug)]
pub enum QueryError {
    /// The descriptor cannot be turned into SQL (bad enum name, inverted range, zero bucket width).
    InvalidQueryShape(String),
    /// The resolution and date range imply more buckets than the configured ceiling.
    TooManyBuckets { requested: u64, limit: u64 },
    /// A calendar component was out of range.
    InvalidDate(String),
    /// A timestamp fell outside the accumulator's `[start, end)` span.
    OutOfRange {
        timestamp: NaiveDateTime,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// A result row did not match the column layout that was asked for.
    InvalidRow(String),
    Database(duckdb::Error),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQueryShape(msg) => write!(f, "Invalid query: {msg}"),
            Self::TooManyBuckets { requested, limit } => write!(
                f,
                "Too many buckets: the limit is {limit} but the query requested {requested}"
            ),
            Self::InvalidDate(msg) => write!(f, "Invalid date: {msg}"),
            Self::OutOfRange {
                timestamp,
                start,
                end,
            } => write!(f, "Time out of bounds: {timestamp} is not in [{start}, {end})"),
            Self::InvalidRow(msg) => write!(f, "Invalid result row: {msg}"),
            Self::Database(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<duckdb::Error> for QueryError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}
