//! Kernel log line matchers.
//!
//! Each matcher inspects one dmesg/kmsg/pstore line and returns a
//! [`LineMatch`] when the line carries a known crash or error signature.
//! [`match_kernel_line`] combines them in priority order and is the match
//! function the pstore scanner and kmsg watchers feed to the event store.

use std::sync::LazyLock;

use regex::Regex;
use storage::LineMatch;

pub const EVENT_SYSRQ_CRASH: &str = "sysrq_crash";
pub const EVENT_KERNEL_PANIC: &str = "kernel_panic";
pub const EVENT_OOM_KILL: &str = "memory_oom";

static KERNEL_PANIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Kernel panic - not syncing: (.+)").expect("invalid kernel panic regex")
});

static OOM_KILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Out of memory: Killed process (\d+) \(([^)]+)\)").expect("invalid oom regex")
});

/// Matches a manually triggered crash via the magic SysRq key, e.g.
/// `sysrq: SysRq : Trigger a crash`.
pub fn match_sysrq_crash(line: &str) -> Option<LineMatch> {
    line.contains("sysrq: SysRq : Trigger a crash")
        .then(|| LineMatch::new(EVENT_SYSRQ_CRASH, "SysRq crash trigger detected"))
}

/// Matches a kernel panic line and surfaces the panic detail as the message,
/// e.g. `Kernel panic - not syncing: Test panic triggered by crash_test module`.
pub fn match_kernel_panic(line: &str) -> Option<LineMatch> {
    let captures = KERNEL_PANIC_RE.captures(line)?;
    Some(LineMatch::new(
        EVENT_KERNEL_PANIC,
        captures.get(1)?.as_str().trim(),
    ))
}

/// Matches an OOM kill, e.g. `Out of memory: Killed process 123 (vector)`.
pub fn match_oom_kill(line: &str) -> Option<LineMatch> {
    let captures = OOM_KILL_RE.captures(line)?;
    let pid = captures.get(1)?.as_str();
    let process = captures.get(2)?.as_str();
    Some(LineMatch::new(
        EVENT_OOM_KILL,
        format!("OOM killed process {pid} ({process})"),
    ))
}

/// Combined matcher over all known kernel signatures; first match wins.
pub fn match_kernel_line(line: &str) -> Option<LineMatch> {
    match_sysrq_crash(line)
        .or_else(|| match_kernel_panic(line))
        .or_else(|| match_oom_kill(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_sysrq_crash_trigger() {
        let cases = [
            "<6>[  201.650687] sysrq: SysRq : Trigger a crash",
            "<6>[  100.123456] sysrq: SysRq : Trigger a crash",
        ];
        for line in cases {
            let m = match_kernel_line(line).unwrap();
            assert_eq!(m.name, EVENT_SYSRQ_CRASH);
            assert_eq!(m.message, "SysRq crash trigger detected");
        }
    }

    #[test]
    fn matches_kernel_panic_with_detail() {
        let m = match_kernel_line(
            "<0>[ 3098.275469] Kernel panic - not syncing: Test panic triggered by crash_test module",
        )
        .unwrap();
        assert_eq!(m.name, EVENT_KERNEL_PANIC);
        assert_eq!(m.message, "Test panic triggered by crash_test module");

        let m = match_kernel_line("<0>[12345.678901] Kernel panic - not syncing: Out of memory")
            .unwrap();
        assert_eq!(m.message, "Out of memory");
    }

    #[test]
    fn matches_oom_kill() {
        let m = match_kernel_line(
            "[Mon Oct  7 10:02:22 2024] Out of memory: Killed process 345646 (vector) total-vm:123kB",
        )
        .unwrap();
        assert_eq!(m.name, EVENT_OOM_KILL);
        assert_eq!(m.message, "OOM killed process 345646 (vector)");
    }

    #[test]
    fn uninteresting_lines_are_skipped() {
        let cases = [
            "<4>[  201.654822] BUG: unable to handle kernel NULL pointer dereference",
            "",
            "usb 1-1: new high-speed USB device",
        ];
        for line in cases {
            assert!(match_kernel_line(line).is_none(), "{line:?}");
        }
    }
}
