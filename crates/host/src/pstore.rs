//! Persistent-store (pstore) crash remains scanner.
//!
//! systemd moves kernel crash remains out of `/sys/fs/pstore` into
//! `/var/lib/systemd/pstore` on boot. Scanning that directory after a reboot
//! recovers panic and sysrq traces from the previous boot.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use storage::{Bucket, Event, EventStore, Scanner};
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Where systemd archives pstore contents.
pub const DEFAULT_PSTORE_DIR: &str = "/var/lib/systemd/pstore";

/// Bucket holding events recovered from pstore.
pub const PSTORE_BUCKET: &str = "pstore";

/// Scans archived pstore files for known kernel crash signatures and records
/// them in the [`PSTORE_BUCKET`].
pub struct PstoreReader {
    scanner: Scanner,
    bucket: Arc<Bucket>,
}

impl PstoreReader {
    pub fn new(store: &EventStore, dir: impl Into<PathBuf>) -> Result<Self> {
        let bucket = store.bucket(PSTORE_BUCKET)?;
        let scanner = Scanner::new(dir, Arc::clone(&bucket));
        Ok(Self { scanner, bucket })
    }

    /// The bucket events land in; hand this to a
    /// [`RebootTracker`](crate::RebootTracker) as an aux bucket to surface
    /// crash signatures next to reboots.
    pub fn bucket(&self) -> Arc<Bucket> {
        Arc::clone(&self.bucket)
    }

    /// Scan the pstore directory once. Re-scanning unchanged remains within
    /// the lookback window records nothing new.
    pub fn scan(&self, cancel: &CancellationToken) -> Result<()> {
        self.scanner.scan(cancel, matchers::match_kernel_line)?;
        Ok(())
    }

    pub fn get(&self, cancel: &CancellationToken, since: DateTime<Utc>) -> Result<Vec<Event>> {
        Ok(self.bucket.get(cancel, since)?)
    }
}
