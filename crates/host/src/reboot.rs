//! Reboot tracking on top of the event store.
//!
//! [`RebootTracker::record`] turns a boot-time reading into at most one
//! stored reboot event per actual boot: readings of a boot already recorded
//! are dropped, as are readings older than the last recorded boot (a stale
//! clock or a re-read of rotated state, never a real reboot). Reboot reasons
//! captured separately (watchdog logs, pstore remains) are stored as their
//! own events and folded into the reboot messages on retrieval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use storage::{Bucket, Event, EventStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Result, uptime};

/// Bucket holding reboot and reboot-reason events.
pub const REBOOT_BUCKET: &str = "os";

pub const EVENT_REBOOT: &str = "reboot";
pub const EVENT_REBOOT_REASON: &str = "reboot_reason";

/// Readings this close to the last recorded reboot are the same boot: clock
/// adjustments and uptime rounding move the derived boot time by a few
/// seconds between reads.
const SAME_BOOT_WINDOW: Duration = Duration::from_secs(60);

/// Source of the current boot time. Injectable so the dedup windows are
/// testable without rebooting the host.
pub type BootTimeFn = Arc<dyn Fn() -> Result<DateTime<Utc>> + Send + Sync>;

pub struct RebootTracker {
    bucket: Arc<Bucket>,
    aux: Vec<Arc<Bucket>>,
    boot_time_fn: BootTimeFn,
}

impl RebootTracker {
    /// Create a tracker over the store's [`REBOOT_BUCKET`], reading boot time
    /// from `/proc/uptime`.
    pub fn new(store: &EventStore) -> Result<Self> {
        let bucket = store.bucket(REBOOT_BUCKET)?;
        Ok(Self {
            bucket,
            aux: Vec::new(),
            boot_time_fn: Arc::new(uptime::last_reboot_time),
        })
    }

    /// Replace the boot time source. Test hook.
    pub fn with_boot_time_fn(mut self, boot_time_fn: BootTimeFn) -> Self {
        self.boot_time_fn = boot_time_fn;
        self
    }

    /// Also merge events from this bucket on retrieval. Used to surface
    /// reboot reasons recorded by other collectors (e.g. the pstore scanner)
    /// alongside the tracker's own events.
    pub fn with_aux_bucket(mut self, bucket: Arc<Bucket>) -> Self {
        self.aux.push(bucket);
        self
    }

    /// Record the current boot as a reboot event, unless it was already
    /// recorded, falls outside the retention window, or is older than the
    /// most recent recorded reboot.
    pub fn record(&self, cancel: &CancellationToken) -> Result<()> {
        let boot_time = truncate_to_second((self.boot_time_fn)()?);
        let now = self.bucket.now();
        let retention = to_delta(self.bucket.retention());
        if now.signed_duration_since(boot_time) >= retention {
            debug!(%boot_time, "boot predates the retention window, skipping");
            return Ok(());
        }

        let message = format!("system reboot detected {}", boot_time.to_rfc3339());
        let event = Event::new(boot_time, EVENT_REBOOT, message.clone(), message);
        if self.bucket.find(cancel, &event)?.is_some() {
            return Ok(());
        }

        let history = self.bucket.get(cancel, now - retention)?;
        if let Some(prev) = history.iter().find(|e| e.name == EVENT_REBOOT) {
            let since_prev = boot_time.signed_duration_since(prev.time);
            if since_prev < TimeDelta::zero() {
                debug!(%boot_time, prev = %prev.time, "stale boot reading, skipping");
                return Ok(());
            }
            if since_prev < to_delta(SAME_BOOT_WINDOW) {
                return Ok(());
            }
        }

        self.bucket.insert(cancel, &event)?;
        info!(%boot_time, "recorded reboot");
        Ok(())
    }

    /// Record a reboot reason captured at `time`. The reason text is its own
    /// identity: the same reason within the lookback window is stored once.
    pub fn record_reason(
        &self,
        cancel: &CancellationToken,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let since = self.bucket.lookback_start();
        if self.bucket.count_matching(cancel, reason, since)? > 0 {
            return Ok(());
        }
        let event = Event::new(truncate_to_second(time), EVENT_REBOOT_REASON, reason, reason);
        self.bucket.insert(cancel, &event)?;
        Ok(())
    }

    /// Reboot events since `since`, latest first, with each known reason
    /// appended to the message of the first reboot at or after the reason was
    /// captured. Reason events themselves are not returned.
    pub fn get(&self, cancel: &CancellationToken, since: DateTime<Utc>) -> Result<Vec<Event>> {
        let mut all = self.bucket.get(cancel, since)?;
        for bucket in &self.aux {
            all.extend(bucket.get(cancel, since)?);
        }

        let mut reboots = Vec::new();
        let mut reasons = Vec::new();
        for event in all {
            if event.name == EVENT_REBOOT {
                reboots.push(event);
            } else if event.name == EVENT_REBOOT_REASON {
                reasons.push(event);
            }
        }
        reboots.sort_by(|a, b| b.time.cmp(&a.time));

        let mut seen = HashSet::new();
        for reason in &reasons {
            if !seen.insert(reason.message.clone()) {
                continue;
            }
            let target = reboots
                .iter_mut()
                .filter(|r| r.time >= reason.time)
                .min_by_key(|r| r.time);
            if let Some(reboot) = target {
                reboot
                    .message
                    .push_str(&format!(" (reboot reason: {})", reason.message));
            }
        }

        Ok(reboots)
    }
}

fn truncate_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;
    use storage::DEFAULT_RETENTION;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        store: EventStore,
        tracker: RebootTracker,
        boot: Arc<Mutex<DateTime<Utc>>>,
        cancel: CancellationToken,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = EventStore::open(dir.path().join("events.db"), DEFAULT_RETENTION)
            .unwrap()
            .with_now_fn(Arc::new(fixed_now));
        let boot = Arc::new(Mutex::new(fixed_now() - TimeDelta::hours(1)));
        let source = Arc::clone(&boot);
        let tracker = RebootTracker::new(&store)
            .unwrap()
            .with_boot_time_fn(Arc::new(move || Ok(*source.lock().unwrap())));
        Fixture {
            _dir: dir,
            store,
            tracker,
            boot,
            cancel: CancellationToken::new(),
        }
    }

    fn set_boot(f: &Fixture, time: DateTime<Utc>) {
        *f.boot.lock().unwrap() = time;
    }

    fn reboots(f: &Fixture) -> Vec<Event> {
        f.tracker.get(&f.cancel, DateTime::UNIX_EPOCH).unwrap()
    }

    #[test]
    fn records_recent_reboot() {
        let f = fixture();
        f.tracker.record(&f.cancel).unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_REBOOT);
        assert_eq!(events[0].time, fixed_now() - TimeDelta::hours(1));
        assert!(
            events[0].message.starts_with("system reboot detected "),
            "{}",
            events[0].message
        );
    }

    #[test]
    fn identical_reading_is_recorded_once() {
        let f = fixture();
        f.tracker.record(&f.cancel).unwrap();
        f.tracker.record(&f.cancel).unwrap();
        assert_eq!(reboots(&f).len(), 1);
    }

    #[test]
    fn reading_within_same_boot_window_is_skipped() {
        let f = fixture();
        let first = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();

        for offset in [30, 59] {
            set_boot(&f, first + TimeDelta::seconds(offset));
            f.tracker.record(&f.cancel).unwrap();
        }

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, first);
    }

    #[test]
    fn reading_past_same_boot_window_is_recorded() {
        let f = fixture();
        let first = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();

        set_boot(&f, first + TimeDelta::seconds(61));
        f.tracker.record(&f.cancel).unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].time, first + TimeDelta::seconds(61));
        assert_eq!(events[1].time, first);
    }

    #[test]
    fn stale_reading_is_rejected() {
        let f = fixture();
        let first = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();

        set_boot(&f, first - TimeDelta::minutes(5));
        f.tracker.record(&f.cancel).unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, first);
    }

    #[test]
    fn boot_older_than_retention_is_skipped() {
        let f = fixture();
        set_boot(&f, fixed_now() - TimeDelta::days(4));
        f.tracker.record(&f.cancel).unwrap();
        assert!(reboots(&f).is_empty());
    }

    #[test]
    fn reason_annotates_following_reboot() {
        let f = fixture();
        let boot = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();
        f.tracker
            .record_reason(&f.cancel, boot - TimeDelta::minutes(1), "hardware watchdog")
            .unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert!(
            events[0].message.ends_with("(reboot reason: hardware watchdog)"),
            "{}",
            events[0].message
        );
    }

    #[test]
    fn repeated_reason_is_annotated_once() {
        let f = fixture();
        let boot = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();
        for _ in 0..3 {
            f.tracker
                .record_reason(&f.cancel, boot - TimeDelta::minutes(1), "hardware watchdog")
                .unwrap();
        }

        let events = reboots(&f);
        assert_eq!(
            events[0].message.matches("reboot reason").count(),
            1,
            "{}",
            events[0].message
        );
    }

    #[test]
    fn distinct_reasons_annotate_their_own_reboots() {
        let f = fixture();
        let first = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();
        let second = first + TimeDelta::minutes(10);
        set_boot(&f, second);
        f.tracker.record(&f.cancel).unwrap();

        f.tracker
            .record_reason(&f.cancel, first - TimeDelta::minutes(1), "kernel panic")
            .unwrap();
        f.tracker
            .record_reason(&f.cancel, second - TimeDelta::minutes(1), "watchdog reset")
            .unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 2);
        assert!(events[0].message.contains("(reboot reason: watchdog reset)"));
        assert!(events[1].message.contains("(reboot reason: kernel panic)"));
    }

    #[test]
    fn reason_after_last_reboot_is_dropped() {
        let f = fixture();
        let boot = *f.boot.lock().unwrap();
        f.tracker.record(&f.cancel).unwrap();
        f.tracker
            .record_reason(&f.cancel, boot + TimeDelta::minutes(1), "late reason")
            .unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert!(!events[0].message.contains("reboot reason"));
    }

    #[test]
    fn get_ignores_foreign_events() {
        let f = fixture();
        f.tracker.record(&f.cancel).unwrap();

        let bucket = f.store.bucket(REBOOT_BUCKET).unwrap();
        bucket
            .insert(
                &f.cancel,
                &Event::new(fixed_now(), "kernel_panic", "panic", "raw panic"),
            )
            .unwrap();

        let events = reboots(&f);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_REBOOT);
    }

    #[test]
    fn aux_bucket_events_are_merged() {
        let f = fixture();
        f.tracker.record(&f.cancel).unwrap();

        let aux = f.store.bucket("pstore").unwrap();
        let other = fixed_now() - TimeDelta::hours(2);
        aux.insert(
            &f.cancel,
            &Event::new(other, EVENT_REBOOT, "system reboot detected", "aux raw"),
        )
        .unwrap();

        let merged = RebootTracker::new(&f.store)
            .unwrap()
            .with_aux_bucket(aux)
            .get(&f.cancel, DateTime::UNIX_EPOCH)
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[0].time > merged[1].time);
        assert_eq!(merged[1].raw_message, "aux raw");
    }

    #[test]
    fn cancelled_token_aborts_record() {
        let f = fixture();
        f.cancel.cancel();
        assert!(matches!(
            f.tracker.record(&f.cancel),
            Err(Error::Storage(storage::Error::Cancelled))
        ));
    }

    #[test]
    fn boot_time_error_propagates() {
        let f = fixture();
        let tracker = RebootTracker::new(&f.store)
            .unwrap()
            .with_boot_time_fn(Arc::new(|| Err(Error::BootTime("uptime unreadable".into()))));
        assert!(matches!(
            tracker.record(&f.cancel),
            Err(Error::BootTime(_))
        ));
    }
}
