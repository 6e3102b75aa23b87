use crate::storage::{format_timestamp, parse_timestamp, StorageError};
use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

/// A view as reported by a site, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRawView {
    pub url: String,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: NaiveDateTime,
}

/// A stored raw view awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawView {
    pub id: i64,
    pub url: String,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: NaiveDateTime,
}

/// Insert a batch of raw views in a single transaction.
///
/// Either every view is stored or none is.
pub fn insert_batch(conn: &mut Connection, views: &[NewRawView]) -> Result<usize, StorageError> {
    if views.is_empty() {
        return Ok(0);
    }
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO raw_views (url, ip_address, user_agent, timestamp)
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP))",
        )?;
        for view in views {
            stmt.execute(duckdb::params![
                view.url,
                view.ip_address,
                view.user_agent,
                format_timestamp(view.timestamp),
            ])?;
        }
    }
    tx.commit()?;
    Ok(views.len())
}

/// Oldest unprocessed raw views, at most `limit`.
pub fn fetch_unprocessed(conn: &Connection, limit: usize) -> Result<Vec<RawView>, StorageError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, url, ip_address, user_agent, strftime(timestamp, '%Y-%m-%d %H:%M:%S.%f')
         FROM raw_views
         WHERE process_timestamp IS NULL
         ORDER BY id
         LIMIT ?",
    )?;
    let rows = stmt.query_map(duckdb::params![limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut views = Vec::new();
    for row in rows {
        let (id, url, ip_address, user_agent, timestamp) = row?;
        views.push(RawView {
            id,
            url,
            ip_address,
            user_agent,
            timestamp: parse_timestamp(&timestamp)?,
        });
    }
    Ok(views)
}

/// Number of raw views not yet processed.
pub fn count_unprocessed(conn: &Connection) -> Result<u64, StorageError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM raw_views WHERE process_timestamp IS NULL")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Stamp the given raw views as processed at `processed_at`.
pub fn mark_processed(
    conn: &Connection,
    ids: &[i64],
    processed_at: NaiveDateTime,
) -> Result<usize, StorageError> {
    let stamp = format_timestamp(processed_at);
    let mut stmt = conn.prepare(
        "UPDATE raw_views SET process_timestamp = CAST(? AS TIMESTAMP)
         WHERE id = ? AND process_timestamp IS NULL",
    )?;
    let mut updated = 0;
    for id in ids {
        updated += stmt.execute(duckdb::params![stamp, id])?;
    }
    Ok(updated)
}

/// Delete raw views processed before `cutoff`. Unprocessed rows are never removed.
pub fn delete_processed_before(
    conn: &Connection,
    cutoff: NaiveDateTime,
) -> Result<usize, StorageError> {
    let deleted = conn.execute(
        "DELETE FROM raw_views
         WHERE process_timestamp IS NOT NULL AND process_timestamp < CAST(? AS TIMESTAMP)",
        duckdb::params![format_timestamp(cutoff)],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::schema::init_schema(&conn).unwrap();
        conn
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn view(url: &str, ts: NaiveDateTime) -> NewRawView {
        NewRawView {
            url: url.to_string(),
            ip_address: "203.0.113.9".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            timestamp: ts,
        }
    }

    #[test]
    fn test_insert_and_fetch() {
        let mut conn = setup();
        let inserted = insert_batch(
            &mut conn,
            &[view("https://a.example/", at(1, 10)), view("https://a.example/b", at(1, 11))],
        )
        .unwrap();
        assert_eq!(inserted, 2);

        let pending = fetch_unprocessed(&conn, 10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, 1);
        assert_eq!(pending[0].url, "https://a.example/");
        assert_eq!(pending[0].timestamp, at(1, 10));
        assert_eq!(pending[1].url, "https://a.example/b");
        assert_eq!(count_unprocessed(&conn).unwrap(), 2);
    }

    #[test]
    fn test_insert_empty_batch() {
        let mut conn = setup();
        assert_eq!(insert_batch(&mut conn, &[]).unwrap(), 0);
    }

    #[test]
    fn test_fetch_respects_limit() {
        let mut conn = setup();
        let views: Vec<_> = (1..=5).map(|h| view("https://a.example/", at(1, h))).collect();
        insert_batch(&mut conn, &views).unwrap();
        let pending = fetch_unprocessed(&conn, 3).unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[2].timestamp, at(1, 3));
    }

    #[test]
    fn test_mark_processed_hides_rows() {
        let mut conn = setup();
        insert_batch(
            &mut conn,
            &[view("https://a.example/", at(1, 10)), view("https://a.example/", at(1, 11))],
        )
        .unwrap();
        assert_eq!(mark_processed(&conn, &[1], at(2, 0)).unwrap(), 1);
        // Already processed rows are not stamped twice.
        assert_eq!(mark_processed(&conn, &[1], at(3, 0)).unwrap(), 0);

        let pending = fetch_unprocessed(&conn, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 2);
    }

    #[test]
    fn test_gc_only_deletes_old_processed_rows() {
        let mut conn = setup();
        let views: Vec<_> = (1..=3).map(|h| view("https://a.example/", at(1, h))).collect();
        insert_batch(&mut conn, &views).unwrap();
        mark_processed(&conn, &[1], at(2, 0)).unwrap();
        mark_processed(&conn, &[2], at(10, 0)).unwrap();

        let deleted = delete_processed_before(&conn, at(5, 0)).unwrap();
        assert_eq!(deleted, 1);

        let mut stmt = conn.prepare("SELECT id FROM raw_views ORDER BY id").unwrap();
        let ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
