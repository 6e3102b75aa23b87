use crate::storage::{format_timestamp, StorageError};
use chrono::NaiveDateTime;
use duckdb::Connection;

/// An enriched view, ready for aggregate queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedView {
    pub raw_view_id: i64,
    pub url: String,
    pub visitor_id: String,
    pub timestamp: NaiveDateTime,
    pub process_timestamp: NaiveDateTime,
    pub is_bot: bool,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub operating_system: Option<String>,
    pub operating_system_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub device: Option<String>,
    pub device_type: String,
}

/// Insert processed views. Callers wanting atomicity pass a transaction.
pub fn insert_batch(conn: &Connection, views: &[ProcessedView]) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare(
        "INSERT INTO processed_views (raw_view_id, url, visitor_id, timestamp, process_timestamp,
         is_bot, hostname, domain, country, region, city, operating_system,
         operating_system_version, browser, browser_version, device, device_type)
         VALUES (?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for view in views {
        stmt.execute(duckdb::params![
            view.raw_view_id,
            view.url,
            view.visitor_id,
            format_timestamp(view.timestamp),
            format_timestamp(view.process_timestamp),
            view.is_bot,
            view.hostname,
            view.domain,
            view.country,
            view.region,
            view.city,
            view.operating_system,
            view.operating_system_version,
            view.browser,
            view.browser_version,
            view.device,
            view.device_type,
        ])?;
    }
    Ok(views.len())
}

/// Total number of processed views.
pub fn count(conn: &Connection) -> Result<u64, StorageError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM processed_views")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}
