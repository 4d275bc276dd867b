use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_observations",
        sql: r#"
CREATE TABLE IF NOT EXISTS observations (
    instrument TEXT NOT NULL,
    date DATE NOT NULL,
    value DOUBLE NOT NULL,
    open DOUBLE,
    high DOUBLE,
    low DOUBLE,
    volume BIGINT,
    inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(instrument, date)
);
"#,
    },
    Migration {
        version: "0002_backfill_log",
        sql: r#"
CREATE TABLE IF NOT EXISTS backfill_log (
    run_id TEXT NOT NULL,
    instrument TEXT NOT NULL,
    records_added BIGINT NOT NULL,
    api_calls_used BIGINT NOT NULL,
    remaining_gap BIGINT NOT NULL,
    quality_score DOUBLE NOT NULL,
    status TEXT NOT NULL,
    errors TEXT NOT NULL,
    deferred BOOLEAN NOT NULL DEFAULT FALSE,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY(run_id, instrument)
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_observations_instrument_date ON observations(instrument, date);
CREATE INDEX IF NOT EXISTS idx_backfill_log_instrument ON backfill_log(instrument, recorded_at);
"#,
    },
    Migration {
        version: "0004_backfill_log_order",
        sql: r#"
DROP INDEX IF EXISTS idx_backfill_log_instrument;
ALTER TABLE backfill_log ADD COLUMN IF NOT EXISTS seq BIGINT;
ALTER TABLE backfill_log ADD COLUMN IF NOT EXISTS retryable BOOLEAN DEFAULT FALSE;
CREATE INDEX IF NOT EXISTS idx_backfill_log_instrument ON backfill_log(instrument, seq);
"#,
    },
];

/// Apply every migration that is not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, in application order.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|migration| migration.version)
}
