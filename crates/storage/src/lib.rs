//! SQLite-backed event storage for host diagnostics.
//!
//! This crate persists derived host events — kernel crash signatures,
//! reboots, hardware errors — into a small local event store with
//! deduplication, retention, and time-ordered retrieval.
//!
//! # Core Concepts
//!
//! ## EventStore and Bucket
//!
//! The [`EventStore`] wraps a write connection and a read connection to one
//! SQLite database and hands out named [`Bucket`]s: independent tables that
//! share a retention window. Creating a bucket ensures its table exists and
//! purges rows older than the retention window, so retention is
//! self-enforcing on every reopen — there is no background purge job.
//!
//! ## Event
//!
//! An [`Event`] is one recorded observation: a UTC timestamp (Unix-second
//! precision), a short category name, a derived message, and the raw source
//! line. The raw line is the identity key for deduplication — the same line
//! seen again within the lookback window is not recorded twice, while the
//! same line far apart in time is a legitimate new event.
//!
//! ## Scanner
//!
//! The [`Scanner`] walks a directory of text sources (bounded depth), applies
//! a caller-supplied match function per line, and records matches through a
//! bucket with the dedup check applied. Callers supply the match function;
//! returning `None` skips the line.
//!
//! # Example
//!
//! ```no_run
//! use storage::{EventStore, LineMatch, Scanner, DEFAULT_RETENTION};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = EventStore::open("events.db", DEFAULT_RETENTION)?;
//! let bucket = store.bucket("pstore")?;
//!
//! let scanner = Scanner::new("/var/lib/systemd/pstore", bucket.clone());
//! scanner.scan(&CancellationToken::new(), |line| {
//!     line.contains("Kernel panic")
//!         .then(|| LineMatch::new("kernel_panic", "kernel panic detected"))
//! })?;
//!
//! for event in bucket.get(&CancellationToken::new(), chrono::DateTime::UNIX_EPOCH)? {
//!     println!("{} {} {}", event.time, event.name, event.message);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod relation;
mod scan;
mod store;

pub use error::{Error, Result};
pub use event::Event;
pub use scan::{LineMatch, MAX_SCAN_DEPTH, Scanner};
pub use store::{Bucket, BucketOptions, DEFAULT_RETENTION, EventStore, NowFn};
