use duckdb::Connection;

/// Reported views awaiting enrichment. `process_timestamp` stays NULL until
/// the processor has turned the row into a `processed_views` row.
pub const CREATE_RAW_VIEWS_TABLE: &str = r"
CREATE SEQUENCE IF NOT EXISTS raw_views_id_seq START 1;
CREATE TABLE IF NOT EXISTS raw_views (
    id                BIGINT NOT NULL DEFAULT nextval('raw_views_id_seq'),
    url               VARCHAR NOT NULL,
    ip_address        VARCHAR NOT NULL,
    user_agent        VARCHAR NOT NULL,
    timestamp         TIMESTAMP NOT NULL,
    process_timestamp TIMESTAMP
);
";

/// Enriched views. This is the table every aggregate query reads.
pub const CREATE_PROCESSED_VIEWS_TABLE: &str = r"
CREATE SEQUENCE IF NOT EXISTS processed_views_id_seq START 1;
CREATE TABLE IF NOT EXISTS processed_views (
    id                       BIGINT NOT NULL DEFAULT nextval('processed_views_id_seq'),
    raw_view_id              BIGINT NOT NULL,
    url                      VARCHAR NOT NULL,
    visitor_id               VARCHAR NOT NULL,
    timestamp                TIMESTAMP NOT NULL,
    process_timestamp        TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    is_bot                   BOOLEAN NOT NULL DEFAULT false,
    hostname                 VARCHAR,
    domain                   VARCHAR,
    country                  VARCHAR,
    region                   VARCHAR,
    city                     VARCHAR,
    operating_system         VARCHAR,
    operating_system_version VARCHAR,
    browser                  VARCHAR,
    browser_version          VARCHAR,
    device                   VARCHAR,
    device_type              VARCHAR
);
";

/// Create both tables and their id sequences.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_RAW_VIEWS_TABLE)?;
    conn.execute_batch(CREATE_PROCESSED_VIEWS_TABLE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection, table: &str) -> i64 {
        let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}")).unwrap();
        stmt.query_row([], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(count(&conn, "raw_views"), 0);
        assert_eq!(count(&conn, "processed_views"), 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_ids_come_from_sequences() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for url in ["https://a.example/", "https://b.example/"] {
            conn.execute(
                "INSERT INTO raw_views (url, ip_address, user_agent, timestamp)
                 VALUES (?, '10.0.0.1', 'curl/8.0', CAST('2024-01-01 00:00:00' AS TIMESTAMP))",
                duckdb::params![url],
            )
            .unwrap();
        }
        let mut stmt = conn.prepare("SELECT id FROM raw_views ORDER BY id").unwrap();
        let ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_processed_view_optional_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO processed_views (raw_view_id, url, visitor_id, timestamp)
             VALUES (1, 'https://a.example/', 'v1', CAST('2024-01-01 00:00:00' AS TIMESTAMP))",
            [],
        )
        .unwrap();
        let mut stmt = conn
            .prepare("SELECT is_bot, country, process_timestamp IS NOT NULL FROM processed_views")
            .unwrap();
        let (is_bot, country, stamped): (bool, Option<String>, bool) = stmt
            .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        assert!(!is_bot);
        assert!(country.is_none());
        assert!(stamped);
    }
}
