//! Event types for the host diagnostics log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recorded host event.
///
/// `raw_message` is the unmodified source line and serves as the identity key
/// for deduplication; `message` is the human-readable derived description and
/// may be augmented at retrieval (e.g. reboot reasons).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event time, stored as Unix seconds, always UTC.
    pub time: DateTime<Utc>,
    /// Short category tag, e.g. "reboot", "sysrq_crash", "kernel_panic".
    pub name: String,
    /// Derived human-readable description.
    pub message: String,
    /// Original unprocessed source line, used as the dedup key.
    pub raw_message: String,
}

impl Event {
    pub fn new(
        time: DateTime<Utc>,
        name: impl Into<String>,
        message: impl Into<String>,
        raw_message: impl Into<String>,
    ) -> Self {
        Self {
            time,
            name: name.into(),
            message: message.into(),
            raw_message: raw_message.into(),
        }
    }
}
