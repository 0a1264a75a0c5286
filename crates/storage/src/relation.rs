//! SQLite relation adapter.
//!
//! One table per bucket, named `<bucket>_v0_7_0` so a schema change can roll
//! out under a new suffix without destroying recorded history. Every mutation
//! runs inside an explicit transaction; errors are wrapped with the operation
//! and table name and propagated unchanged.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{Error, Event, Result};

const SCHEMA_VERSION: &str = "v0_7_0";

/// Derives the table name for a bucket. Spaces and dashes collapse to
/// underscores so bucket names stay free-form at the API surface.
pub(crate) fn table_name(bucket: &str) -> String {
    let mut name = bucket.trim().to_lowercase().replace([' ', '-'], "_");
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    format!("{name}_{SCHEMA_VERSION}")
}

/// Idempotent table + index creation. Concurrent callers racing to create the
/// same table all succeed through `IF NOT EXISTS`.
pub(crate) fn ensure_table(conn: &mut Connection, table: &str) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::db("create table", table, e))?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            timestamp INTEGER NOT NULL,
            event_name TEXT NOT NULL,
            message TEXT,
            raw_message TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp);
        CREATE INDEX IF NOT EXISTS idx_{table}_raw_message ON {table}(raw_message);"
    ))
    .map_err(|e| Error::db("create table", table, e))?;
    tx.commit().map_err(|e| Error::db("create table", table, e))
}

pub(crate) fn insert(conn: &mut Connection, table: &str, event: &Event) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::db("insert", table, e))?;
    tx.execute(
        &format!(
            "INSERT INTO {table} (timestamp, event_name, message, raw_message)
             VALUES (?1, ?2, ?3, ?4)"
        ),
        params![
            event.time.timestamp(),
            event.name,
            event.message,
            event.raw_message
        ],
    )
    .map_err(|e| Error::db("insert", table, e))?;
    tx.commit().map_err(|e| Error::db("insert", table, e))
}

/// All rows with `timestamp >= since`, latest first.
pub(crate) fn query_since(
    conn: &Connection,
    table: &str,
    since: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT timestamp, event_name, message, raw_message FROM {table}
             WHERE timestamp >= ?1 ORDER BY timestamp DESC"
        ))
        .map_err(|e| Error::db("query", table, e))?;

    let rows = stmt
        .query_map([since.timestamp()], decode_row)
        .map_err(|e| Error::db("query", table, e))?;

    let mut events = Vec::new();
    for row in rows {
        events.push(decode_event(table, row.map_err(|e| Error::db("query", table, e))?)?);
    }
    Ok(events)
}

/// Exact match on `(timestamp, event_name, raw_message)`, `None` when absent.
pub(crate) fn find(conn: &Connection, table: &str, event: &Event) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT timestamp, event_name, message, raw_message FROM {table}
                 WHERE timestamp = ?1 AND event_name = ?2 AND raw_message = ?3 LIMIT 1"
            ),
            params![event.time.timestamp(), event.name, event.raw_message],
            decode_row,
        )
        .optional()
        .map_err(|e| Error::db("find", table, e))?;
    row.map(|r| decode_event(table, r)).transpose()
}

pub(crate) fn latest(conn: &Connection, table: &str) -> Result<Option<Event>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT timestamp, event_name, message, raw_message FROM {table}
                 ORDER BY timestamp DESC LIMIT 1"
            ),
            [],
            decode_row,
        )
        .optional()
        .map_err(|e| Error::db("latest", table, e))?;
    row.map(|r| decode_event(table, r)).transpose()
}

/// Number of rows with this exact raw message at or after `since`. Used for
/// the dedup-window check before inserting a scanned candidate.
pub(crate) fn count_matching(
    conn: &Connection,
    table: &str,
    raw_message: &str,
    since: DateTime<Utc>,
) -> Result<u64> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {table} WHERE raw_message = ?1 AND timestamp >= ?2"
        ),
        params![raw_message, since.timestamp()],
        |row| row.get::<_, i64>(0).map(|n| n as u64),
    )
    .map_err(|e| Error::db("count", table, e))
}

/// Transactional bulk delete of rows strictly older than the cutoff.
/// Deleting an already-purged range is a no-op reporting 0 rows.
pub(crate) fn delete_older_than(
    conn: &mut Connection,
    table: &str,
    cutoff: DateTime<Utc>,
) -> Result<usize> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::db("purge", table, e))?;
    let deleted = tx
        .execute(
            &format!("DELETE FROM {table} WHERE timestamp < ?1"),
            [cutoff.timestamp()],
        )
        .map_err(|e| Error::db("purge", table, e))?;
    tx.commit().map_err(|e| Error::db("purge", table, e))?;
    Ok(deleted)
}

type RawRow = (i64, String, Option<String>, Option<String>);

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_event(table: &str, (ts, name, message, raw): RawRow) -> Result<Event> {
    let time = DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| Error::db("decode", table, rusqlite::Error::IntegralValueOutOfRange(0, ts)))?;
    Ok(Event {
        time,
        name,
        message: message.unwrap_or_default(),
        raw_message: raw.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_sanitizes_bucket_names() {
        assert_eq!(table_name("os"), "os_v0_7_0");
        assert_eq!(table_name("test pstore"), "test_pstore_v0_7_0");
        assert_eq!(table_name("Test-Pstore"), "test_pstore_v0_7_0");
        assert_eq!(table_name("a--b  c"), "a_b_c_v0_7_0");
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let table = table_name("test");
        ensure_table(&mut conn, &table).unwrap();
        ensure_table(&mut conn, &table).unwrap();
    }

    #[test]
    fn insert_into_missing_table_fails_with_context() {
        let mut conn = Connection::open_in_memory().unwrap();
        let event = Event::new(Utc::now(), "e", "m", "r");
        let err = insert(&mut conn, "missing_v0_7_0", &event).unwrap_err();
        assert!(err.to_string().contains("missing_v0_7_0"));
    }
}
