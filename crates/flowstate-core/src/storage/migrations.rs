//! Database schema migrations for the reading store.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: one table per signal type plus the kv table.
///
/// Every signal table is keyed by `timestamp` (epoch milliseconds) with a
/// unique index, and carries a `synced` flag.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS hr_local (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            bpm       INTEGER NOT NULL,
            synced    INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_hr_local_timestamp ON hr_local(timestamp);

        CREATE TABLE IF NOT EXISTS sleep_local (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp    INTEGER NOT NULL,
            end_ms       INTEGER,
            duration_min INTEGER,
            synced       INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sleep_local_timestamp ON sleep_local(timestamp);

        CREATE TABLE IF NOT EXISTS typing_local (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp     INTEGER NOT NULL,
            wpm           INTEGER NOT NULL,
            accuracy      REAL NOT NULL,
            total_chars   INTEGER NOT NULL DEFAULT 0,
            errors        INTEGER NOT NULL DEFAULT 0,
            duration_secs INTEGER NOT NULL DEFAULT 0,
            sample_text   TEXT,
            synced        INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_typing_local_timestamp ON typing_local(timestamp);

        CREATE TABLE IF NOT EXISTS reaction_local (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp  INTEGER NOT NULL,
            median_ms  INTEGER NOT NULL,
            test_count INTEGER NOT NULL,
            synced     INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reaction_local_timestamp ON reaction_local(timestamp);

        CREATE TABLE IF NOT EXISTS prediction_local (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp  INTEGER NOT NULL,
            level      TEXT NOT NULL,
            confidence REAL NOT NULL,
            synced     INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_prediction_local_timestamp ON prediction_local(timestamp);

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: per-row revision counter and pending-row indexes.
///
/// `revision` lets the reconciler mark a row synced only if it has not been
/// re-ingested since it was read.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    for table in [
        "hr_local",
        "sleep_local",
        "typing_local",
        "reaction_local",
        "prediction_local",
    ] {
        tx.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN revision INTEGER NOT NULL DEFAULT 1;
             CREATE INDEX IF NOT EXISTS idx_{table}_synced ON {table}(synced);"
        ))?;
    }

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}
