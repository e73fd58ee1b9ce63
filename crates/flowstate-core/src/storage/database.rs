//! SQLite-backed reading store.
//!
//! Provides persistent storage for:
//! - Timestamped readings, one table per signal type
//! - The synced flag tracked by the reconciler
//! - Key-value store for sync bookkeeping
//!
//! The connection sits behind a mutex, so every operation is serialized.
//! Callers in async code must not hold results of [`ReadingStore::with_conn`]
//! across an `.await`; the public methods never do.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::migrations;
use crate::error::StorageError;
use crate::readings::{EnergyLevel, NewReading, Reading, SignalPayload, SignalType};

/// Leading columns selected for every signal table; payload columns follow.
const BASE_COLUMNS: &str = "id, timestamp, synced, revision";
const PAYLOAD_OFFSET: usize = 4;

/// Local store of readings.
pub struct ReadingStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl ReadingStore {
    /// Open (or create) the database file at `path` and apply migrations.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| StorageError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn, Some(path))
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StorageError> {
        migrations::migrate(&conn).map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }

    /// Insert a reading, or replace the payload of the reading already stored
    /// at the same timestamp. Returns the row id, which is stable across
    /// replacements. A replaced row goes back to pending.
    pub fn upsert(&self, signal: SignalType, reading: &NewReading) -> Result<i64, StorageError> {
        check_signal(signal, reading)?;
        self.with_conn(|conn| upsert_row(conn, signal, reading))
    }

    /// Upsert every reading in one transaction. Ids are returned in input
    /// order; if any row fails nothing is written.
    pub fn upsert_batch(
        &self,
        signal: SignalType,
        readings: &[NewReading],
    ) -> Result<Vec<i64>, StorageError> {
        for reading in readings {
            check_signal(signal, reading)?;
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(readings.len());
            for reading in readings {
                ids.push(upsert_row(&tx, signal, reading)?);
            }
            tx.commit()?;
            Ok(ids)
        })
    }

    /// Readings with `start_ms <= timestamp < end_ms`, ascending by timestamp.
    pub fn query_by_time_range(
        &self,
        signal: SignalType,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Reading>, StorageError> {
        if end_ms <= start_ms {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {BASE_COLUMNS}, {} FROM {} WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC",
            payload_columns(signal).join(", "),
            signal.table()
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![start_ms, end_ms], |row| decode_row(signal, row))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Every reading not yet acknowledged by the remote, ordered by id.
    pub fn query_pending(&self, signal: SignalType) -> Result<Vec<Reading>, StorageError> {
        self.pending(signal, None)
    }

    /// At most `limit` pending readings, ordered by id.
    pub fn query_pending_limit(
        &self,
        signal: SignalType,
        limit: usize,
    ) -> Result<Vec<Reading>, StorageError> {
        self.pending(signal, Some(limit))
    }

    fn pending(&self, signal: SignalType, limit: Option<usize>) -> Result<Vec<Reading>, StorageError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {BASE_COLUMNS}, {} FROM {} WHERE synced = 0 ORDER BY id ASC LIMIT ?1",
            payload_columns(signal).join(", "),
            signal.table()
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit], |row| decode_row(signal, row))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Set `synced` for exactly the given ids. Unknown ids are ignored.
    /// Returns the number of rows that changed.
    pub fn mark_synced(&self, signal: SignalType, ids: &[i64]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET synced = 1 WHERE id = ?1 AND synced = 0",
            signal.table()
        );
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for id in ids {
                    changed += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Like [`mark_synced`](Self::mark_synced), but only for rows whose
    /// revision still matches. A row re-ingested after it was read keeps its
    /// pending state.
    pub fn mark_synced_revisions(
        &self,
        signal: SignalType,
        rows: &[(i64, i64)],
    ) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET synced = 1 WHERE id = ?1 AND revision = ?2 AND synced = 0",
            signal.table()
        );
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare(&sql)?;
                for (id, revision) in rows {
                    changed += stmt.execute(params![id, revision])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    pub fn count(&self, signal: SignalType) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", signal.table());
        self.with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get::<_, u64>(0))?))
    }

    pub fn count_pending(&self, signal: SignalType) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE synced = 0", signal.table());
        self.with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get::<_, u64>(0))?))
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?)
        })
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }
}

fn check_signal(signal: SignalType, reading: &NewReading) -> Result<(), StorageError> {
    let actual = reading.signal_type();
    if actual != signal {
        return Err(StorageError::SignalMismatch {
            expected: signal,
            actual,
        });
    }
    Ok(())
}

fn payload_columns(signal: SignalType) -> &'static [&'static str] {
    match signal {
        SignalType::HeartRate => &["bpm"],
        SignalType::Sleep => &["end_ms", "duration_min"],
        SignalType::Typing => &[
            "wpm",
            "accuracy",
            "total_chars",
            "errors",
            "duration_secs",
            "sample_text",
        ],
        SignalType::Reaction => &["median_ms", "test_count"],
        SignalType::Prediction => &["level", "confidence"],
    }
}

fn payload_values(payload: &SignalPayload) -> Vec<Value> {
    fn opt_int<T: Into<i64>>(v: Option<T>) -> Value {
        v.map(|v| Value::Integer(v.into())).unwrap_or(Value::Null)
    }

    match payload {
        SignalPayload::HeartRate { bpm } => vec![Value::Integer((*bpm).into())],
        SignalPayload::Sleep {
            end_ms,
            duration_min,
        } => vec![opt_int(*end_ms), opt_int(*duration_min)],
        SignalPayload::Typing {
            wpm,
            accuracy,
            total_chars,
            errors,
            duration_secs,
            sample_text,
        } => vec![
            Value::Integer((*wpm).into()),
            Value::Real(*accuracy),
            Value::Integer((*total_chars).into()),
            Value::Integer((*errors).into()),
            Value::Integer((*duration_secs).into()),
            sample_text.clone().map(Value::Text).unwrap_or(Value::Null),
        ],
        SignalPayload::Reaction {
            median_ms,
            test_count,
        } => vec![
            Value::Integer((*median_ms).into()),
            Value::Integer((*test_count).into()),
        ],
        SignalPayload::Prediction { level, confidence } => vec![
            Value::Text(level.as_str().to_string()),
            Value::Real(*confidence),
        ],
    }
}

fn upsert_row(conn: &Connection, signal: SignalType, reading: &NewReading) -> Result<i64, StorageError> {
    let columns = payload_columns(signal);
    let placeholders = (2..=columns.len() + 1)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {table} (timestamp, {cols}, synced, revision)
         VALUES (?1, {placeholders}, 0, 1)
         ON CONFLICT(timestamp) DO UPDATE SET {updates}, synced = 0, revision = revision + 1
         RETURNING id",
        table = signal.table(),
        cols = columns.join(", "),
    );

    let mut values = Vec::with_capacity(columns.len() + 1);
    values.push(Value::Integer(reading.timestamp_ms));
    values.extend(payload_values(&reading.payload));

    let id = conn.query_row(&sql, params_from_iter(values), |row| row.get::<_, i64>(0))?;
    Ok(id)
}

fn decode_row(signal: SignalType, row: &Row<'_>) -> rusqlite::Result<Reading> {
    let p = PAYLOAD_OFFSET;
    let payload = match signal {
        SignalType::HeartRate => SignalPayload::HeartRate { bpm: row.get(p)? },
        SignalType::Sleep => SignalPayload::Sleep {
            end_ms: row.get(p)?,
            duration_min: row.get(p + 1)?,
        },
        SignalType::Typing => SignalPayload::Typing {
            wpm: row.get(p)?,
            accuracy: row.get(p + 1)?,
            total_chars: row.get(p + 2)?,
            errors: row.get(p + 3)?,
            duration_secs: row.get(p + 4)?,
            sample_text: row.get(p + 5)?,
        },
        SignalType::Reaction => SignalPayload::Reaction {
            median_ms: row.get(p)?,
            test_count: row.get(p + 1)?,
        },
        SignalType::Prediction => {
            let raw: String = row.get(p)?;
            let level = raw.parse::<EnergyLevel>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(p, Type::Text, e.into())
            })?;
            SignalPayload::Prediction {
                level,
                confidence: row.get(p + 1)?,
            }
        }
    };

    Ok(Reading {
        id: row.get(0)?,
        timestamp_ms: row.get(1)?,
        synced: row.get(2)?,
        revision: row.get(3)?,
        payload,
    })
}
