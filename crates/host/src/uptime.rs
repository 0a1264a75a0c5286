//! Boot time derived from `/proc/uptime`.

use chrono::{DateTime, TimeDelta, Utc};

use crate::{Error, Result};

const PROC_UPTIME: &str = "/proc/uptime";

/// When the host last booted: now minus the first field of `/proc/uptime`.
///
/// Successive calls jitter by a few milliseconds since "now" is re-read each
/// time; callers that need a stable identity should truncate to seconds.
pub fn last_reboot_time() -> Result<DateTime<Utc>> {
    let content = std::fs::read_to_string(PROC_UPTIME)?;
    let uptime_secs = parse_uptime_seconds(&content)?;
    Ok(Utc::now() - TimeDelta::milliseconds((uptime_secs * 1000.0) as i64))
}

fn parse_uptime_seconds(content: &str) -> Result<f64> {
    content
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .ok_or_else(|| Error::MalformedUptime(content.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_field_as_seconds() {
        assert_eq!(parse_uptime_seconds("12345.67 98765.43\n").unwrap(), 12345.67);
        assert_eq!(parse_uptime_seconds("0.00 0.00").unwrap(), 0.0);
    }

    #[test]
    fn rejects_malformed_content() {
        for content in ["", "   \n", "abc def", "-5.0 10.0", "nan 1.0"] {
            assert!(
                matches!(parse_uptime_seconds(content), Err(Error::MalformedUptime(_))),
                "{content:?}"
            );
        }
    }

    #[test]
    fn last_reboot_time_is_in_the_past() {
        let boot = last_reboot_time().unwrap();
        assert!(boot <= Utc::now());
    }
}
