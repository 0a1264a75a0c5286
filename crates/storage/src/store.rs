//! Event store core: bucket lifecycle, dedup-aware insertion, retention.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OpenFlags};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Event, Result, relation};

/// Default retention window for recorded events.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Injectable clock, so dedup-window and retention edge cases are
/// deterministically testable.
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Options applied when creating a bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketOptions {
    /// Skip the purge normally run at bucket construction. Useful for tests
    /// and for read-side consumers that must not race a writer's retention.
    pub disable_purge: bool,
}

/// SQLite-backed store of host diagnostics events, partitioned into named
/// buckets with independent tables but a shared retention window.
///
/// The store holds one write connection (serializing mutations) and one read
/// connection (usable concurrently with writes under WAL). Buckets are
/// created lazily and cached, so repeated [`EventStore::bucket`] calls are
/// cheap and return the same handle.
pub struct EventStore {
    rw: Arc<Mutex<Connection>>,
    ro: Arc<Mutex<Connection>>,
    retention: Duration,
    now_fn: NowFn,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
}

impl EventStore {
    /// Open or create the event database at the given path, in WAL mode with
    /// a separate read-only connection.
    pub fn open(path: impl AsRef<Path>, retention: Duration) -> Result<Self> {
        let rw = Connection::open(path.as_ref()).map_err(Error::Open)?;
        rw.pragma_update(None, "journal_mode", "WAL")
            .map_err(Error::Open)?;
        rw.busy_timeout(Duration::from_secs(5)).map_err(Error::Open)?;

        let ro = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::Open)?;
        ro.busy_timeout(Duration::from_secs(5)).map_err(Error::Open)?;

        Ok(Self::new(rw, ro, retention))
    }

    /// Wrap caller-owned write and read connections. The caller keeps
    /// ownership of the underlying database file and its lifetime.
    pub fn new(rw: Connection, ro: Connection, retention: Duration) -> Self {
        Self {
            rw: Arc::new(Mutex::new(rw)),
            ro: Arc::new(Mutex::new(ro)),
            retention,
            now_fn: Arc::new(Utc::now),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the wall clock. Test hook for retention and dedup windows.
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Get or create the bucket with the given name.
    ///
    /// On first creation the bucket's table is ensured and rows older than
    /// `now - retention` are purged, so every reopen trims stale history
    /// without a background job.
    pub fn bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        self.bucket_with(name, BucketOptions::default())
    }

    pub fn bucket_with(&self, name: &str, options: BucketOptions) -> Result<Arc<Bucket>> {
        let mut buckets = self.buckets.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(bucket) = buckets.get(name) {
            return Ok(Arc::clone(bucket));
        }

        let table = relation::table_name(name);
        {
            let mut conn = lock(&self.rw)?;
            relation::ensure_table(&mut conn, &table)?;
        }

        let bucket = Arc::new(Bucket {
            table,
            rw: Arc::clone(&self.rw),
            ro: Arc::clone(&self.ro),
            retention: self.retention,
            now_fn: Arc::clone(&self.now_fn),
            closed: AtomicBool::new(false),
        });

        if !options.disable_purge {
            let cutoff = bucket.now() - to_delta(self.retention);
            let purged = bucket.purge(&CancellationToken::new(), cutoff)?;
            if purged > 0 {
                info!(bucket = name, purged, "purged expired events on open");
            }
        }

        buckets.insert(name.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }
}

/// A named partition of the event store.
///
/// All operations are synchronous blocking calls and safe to invoke from
/// multiple threads; mutations serialize on the write connection. Each
/// operation takes a [`CancellationToken`] and returns [`Error::Cancelled`]
/// when cancelled at an I/O boundary, rolling back any open transaction.
pub struct Bucket {
    table: String,
    rw: Arc<Mutex<Connection>>,
    ro: Arc<Mutex<Connection>>,
    retention: Duration,
    now_fn: NowFn,
    closed: AtomicBool,
}

impl Bucket {
    /// The underlying table name, including the schema-version suffix.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The retention window, which doubles as the dedup lookback period.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Current time from the injected clock, in UTC.
    pub fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// Start of the dedup lookback window: `now - retention`.
    pub fn lookback_start(&self) -> DateTime<Utc> {
        self.now() - to_delta(self.retention)
    }

    /// Append one event. Duplicate checking is the caller's concern; this
    /// never silently drops a row.
    pub fn insert(&self, cancel: &CancellationToken, event: &Event) -> Result<()> {
        check_cancel(cancel)?;
        let mut conn = lock(&self.rw)?;
        check_cancel(cancel)?;
        relation::insert(&mut conn, &self.table, event)
    }

    /// Exact lookup by `(time, name, raw_message)`; `Ok(None)` when absent.
    pub fn find(&self, cancel: &CancellationToken, event: &Event) -> Result<Option<Event>> {
        check_cancel(cancel)?;
        let conn = lock(&self.ro)?;
        relation::find(&conn, &self.table, event)
    }

    /// Every event with `time >= since`, sorted descending by time (latest
    /// first). An empty result is not an error.
    pub fn get(&self, cancel: &CancellationToken, since: DateTime<Utc>) -> Result<Vec<Event>> {
        check_cancel(cancel)?;
        let conn = lock(&self.ro)?;
        relation::query_since(&conn, &self.table, since)
    }

    /// The most recent event, or `Ok(None)` for an empty bucket.
    pub fn latest(&self, cancel: &CancellationToken) -> Result<Option<Event>> {
        check_cancel(cancel)?;
        let conn = lock(&self.ro)?;
        relation::latest(&conn, &self.table)
    }

    /// Count of rows with this exact raw message at or after `since`.
    pub fn count_matching(
        &self,
        cancel: &CancellationToken,
        raw_message: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        check_cancel(cancel)?;
        let conn = lock(&self.ro)?;
        relation::count_matching(&conn, &self.table, raw_message, since)
    }

    /// Delete all events strictly older than `before`. Idempotent: purging an
    /// already-purged range reports 0 rows deleted.
    pub fn purge(&self, cancel: &CancellationToken, before: DateTime<Utc>) -> Result<usize> {
        check_cancel(cancel)?;
        let mut conn = lock(&self.rw)?;
        check_cancel(cancel)?;
        relation::delete_older_than(&mut conn, &self.table, before)
    }

    /// Mark the bucket closed. Safe to call multiple times, from multiple
    /// threads, and never destroys recorded data.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(table = %self.table, "bucket closed");
        }
    }
}

fn lock(conn: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| Error::LockPoisoned)
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

pub(crate) fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
