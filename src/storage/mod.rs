pub mod migrations;
pub mod processed_views;
pub mod raw_views;
pub mod schema;

use crate::query::columns::TIMESTAMP_FORMAT;
use chrono::NaiveDateTime;

/// Errors from reading or writing the view tables.
#[derive(Debug)]
pub enum StorageError {
    Database(duckdb::Error),
    /// A stored timestamp could not be parsed back.
    InvalidTimestamp(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::InvalidTimestamp(s) => write!(f, "Invalid stored timestamp: {s}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            Self::InvalidTimestamp(_) => None,
        }
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}

pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> Result<NaiveDateTime, StorageError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| StorageError::InvalidTimestamp(format!("'{s}': {e}")))
}
