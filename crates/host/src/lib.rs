//! Host-level diagnostics collectors over the event store.
//!
//! # Core Concepts
//!
//! ## RebootTracker
//!
//! [`RebootTracker`] derives the current boot time from `/proc/uptime` and
//! records each distinct boot as one event, tolerant of repeated readings,
//! small clock drift, and stale readings. Reboot reasons recorded separately
//! are folded into the reboot messages on retrieval.
//!
//! ## PstoreReader
//!
//! [`PstoreReader`] scans the systemd pstore archive for kernel crash
//! signatures from previous boots and records them as events, giving the
//! tracker a reason to attach to the reboot that followed a crash.

mod error;
mod pstore;
mod reboot;
mod uptime;

pub use error::{Error, Result};
pub use pstore::{DEFAULT_PSTORE_DIR, PSTORE_BUCKET, PstoreReader};
pub use reboot::{BootTimeFn, EVENT_REBOOT, EVENT_REBOOT_REASON, REBOOT_BUCKET, RebootTracker};
pub use uptime::last_reboot_time;
