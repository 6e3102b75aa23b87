use crate::storage::schema::{CREATE_PROCESSED_VIEWS_TABLE, CREATE_RAW_VIEWS_TABLE};
use duckdb::Connection;

/// One forward-only schema step. Versions are applied in ascending order and
/// each is recorded in `schema_version` together with its own DDL.
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "raw_views",
        sql: CREATE_RAW_VIEWS_TABLE,
    },
    Migration {
        version: 2,
        name: "processed_views",
        sql: CREATE_PROCESSED_VIEWS_TABLE,
    },
];

/// Highest version this build knows how to reach.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Bring the view tables up to [`latest_version`].
///
/// Steps already recorded are skipped, so calling this on every start is safe.
/// A failing step is rolled back and leaves its version unrecorded.
pub fn run_migrations(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER NOT NULL,
            name       VARCHAR NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    let applied = applied_version(conn)?;
    for step in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, step)?;
        tracing::info!(version = step.version, name = step.name, "Applied schema migration");
    }
    Ok(())
}

fn applied_version(conn: &Connection) -> Result<u32, duckdb::Error> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_version")?;
    stmt.query_row([], |row| row.get(0))
}

fn apply(conn: &Connection, step: &Migration) -> Result<(), duckdb::Error> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    let result = conn.execute_batch(step.sql).and_then(|()| {
        conn.execute(
            "INSERT INTO schema_version (version, name) VALUES (?, ?)",
            duckdb::params![step.version, step.name],
        )
        .map(|_| ())
    });
    match result {
        Ok(()) => conn.execute_batch("COMMIT"),
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::error!(
                    error = %rollback,
                    version = step.version,
                    "Migration rollback failed"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(conn: &Connection) -> Vec<(u32, String)> {
        let mut stmt = conn
            .prepare("SELECT version, name FROM schema_version ORDER BY version")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        rows
    }

    #[test]
    fn test_versions_ascend() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(latest_version(), 2);
    }

    #[test]
    fn test_fresh_database_records_every_step() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(
            recorded(&conn),
            vec![
                (1, "raw_views".to_string()),
                (2, "processed_views".to_string())
            ]
        );
        assert_eq!(applied_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(recorded(&conn).len(), MIGRATIONS.len());
    }

    #[test]
    fn test_only_missing_steps_run() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_version (
                version INTEGER NOT NULL,
                name VARCHAR NOT NULL,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .unwrap();
        apply(&conn, &MIGRATIONS[0]).unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(recorded(&conn).len(), 2);
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM processed_views").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_failed_step_is_not_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let broken = Migration {
            version: 99,
            name: "broken",
            sql: "CREATE TABLE raw_views (id BIGINT)",
        };
        assert!(apply(&conn, &broken).is_err());
        assert_eq!(applied_version(&conn).unwrap(), latest_version());
    }
}
