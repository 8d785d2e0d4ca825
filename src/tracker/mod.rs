//! # Source Tracker
//!
//! Maintains behavioral state for every network source that has sent a
//! request: a sliding time-window of request timestamps, a consecutive
//! auth-failure counter, and reputation flags (suspicious / blocked /
//! trusted). Pure state and query logic, no I/O.
//!
//! Records are created lazily on first request and never removed abruptly;
//! timestamps age out of the window on every write, and fully idle records
//! are reclaimed by `prune_idle` during background maintenance.
//!
//! The map is sharded (`DashMap`), so concurrent request workers touching
//! different sources never contend on a single lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;

use crate::TrackerConfig;

/// Reputation flags for one source. Not mutually exclusive; `trusted`
/// overrides the other two everywhere they are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceFlags {
    pub blocked: bool,
    pub suspicious: bool,
    pub trusted: bool,
}

/// Per-source behavioral record.
#[derive(Debug, Default)]
struct SourceRecord {
    /// Time-ordered request timestamps. Monotonic appends, trimmed from the
    /// front, so a plain deque is sufficient.
    timestamps: std::collections::VecDeque<DateTime<Utc>>,

    /// Consecutive failed-auth count. Reset to zero on success.
    failure_count: u32,

    flags: SourceFlags,
}

/// Tracks request rate, auth failures, and reputation per source.
pub struct SourceTracker {
    records: DashMap<String, SourceRecord>,
    window: Duration,
    flag_private_sources: bool,
}

impl SourceTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            records: DashMap::new(),
            window: Duration::seconds(config.window_secs as i64),
            flag_private_sources: config.flag_private_sources,
        }
    }

    /// Record a request timestamp for `source` without interpreting it as
    /// an auth attempt. The failure counter is left untouched.
    pub fn observe_request(&self, source: &str) {
        self.observe_request_at(source, Utc::now());
    }

    fn observe_request_at(&self, source: &str, now: DateTime<Utc>) {
        let mut record = self.records.entry(source.to_string()).or_default();
        push_timestamp(&mut record, now, self.window);
    }

    /// Record an auth attempt from `source`, trimming entries older than the
    /// tracking window first. A failed attempt increments the failure
    /// counter; a successful one resets it.
    ///
    /// Side effects are confined to this source's record.
    pub fn record_request(&self, source: &str, success: bool) {
        self.record_request_at(source, success, Utc::now());
    }

    fn record_request_at(&self, source: &str, success: bool, now: DateTime<Utc>) {
        let mut record = self.records.entry(source.to_string()).or_default();
        push_timestamp(&mut record, now, self.window);

        if success {
            record.failure_count = 0;
        } else {
            record.failure_count += 1;
        }
    }

    /// Count of requests from `source` within the trailing window.
    pub fn request_rate(&self, source: &str, window_secs: u64) -> usize {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        self.records
            .get(source)
            .map(|r| r.timestamps.iter().filter(|&&ts| ts > cutoff).count())
            .unwrap_or(0)
    }

    /// True once `source` has exceeded `max_requests` in the trailing window.
    pub fn is_rate_limited(&self, source: &str, max_requests: usize, window_secs: u64) -> bool {
        self.request_rate(source, window_secs) > max_requests
    }

    /// Reputation check for `source`.
    ///
    /// Trusted sources are never suspicious regardless of other signals.
    /// Otherwise a source is suspicious if it carries the blocked or
    /// suspicious flag, claims a private/reserved address, or fails to
    /// parse as a network address at all - malformed input is treated as
    /// suspicious, not rejected.
    pub fn is_suspicious(&self, source: &str) -> bool {
        let flags = self.flags(source);
        if flags.trusted {
            return false;
        }
        if flags.blocked || flags.suspicious {
            return true;
        }
        match source.parse::<IpAddr>() {
            Ok(ip) => self.flag_private_sources && is_reserved_address(&ip),
            Err(_) => true,
        }
    }

    /// Current reputation flags for `source` (all-false if untracked).
    pub fn flags(&self, source: &str) -> SourceFlags {
        self.records.get(source).map(|r| r.flags).unwrap_or_default()
    }

    pub fn mark_trusted(&self, source: &str, trusted: bool) {
        self.records.entry(source.to_string()).or_default().flags.trusted = trusted;
    }

    pub fn mark_suspicious(&self, source: &str, suspicious: bool) {
        self.records
            .entry(source.to_string())
            .or_default()
            .flags
            .suspicious = suspicious;
    }

    pub fn mark_blocked(&self, source: &str, blocked: bool) {
        self.records.entry(source.to_string()).or_default().flags.blocked = blocked;
    }

    /// Consecutive failed-auth count for `source`.
    pub fn failure_count(&self, source: &str) -> u32 {
        self.records.get(source).map(|r| r.failure_count).unwrap_or(0)
    }

    /// Record a failed auth attempt and return the new consecutive count.
    pub fn record_failure(&self, source: &str) -> u32 {
        let mut record = self.records.entry(source.to_string()).or_default();
        record.failure_count += 1;
        record.failure_count
    }

    /// Reset the failure counter after a successful auth.
    pub fn reset_failures(&self, source: &str) {
        if let Some(mut record) = self.records.get_mut(source) {
            record.failure_count = 0;
        }
    }

    /// Number of distinct sources currently tracked.
    pub fn source_count(&self) -> usize {
        self.records.len()
    }

    /// Total requests across all sources within the trailing window.
    pub fn total_requests(&self, window_secs: u64) -> usize {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        self.records
            .iter()
            .map(|r| r.timestamps.iter().filter(|&&ts| ts > cutoff).count())
            .sum()
    }

    /// Per-source request counts within the trailing window. Input to the
    /// statistical flood sweep.
    pub fn request_counts(&self, window_secs: u64) -> Vec<(String, usize)> {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        self.records
            .iter()
            .map(|r| {
                let count = r.timestamps.iter().filter(|&&ts| ts > cutoff).count();
                (r.key().clone(), count)
            })
            .collect()
    }

    /// Drop records with no recent requests, no pending failures, and no
    /// flags set. Called from background maintenance, never the hot path.
    pub fn prune_idle(&self) {
        let cutoff = Utc::now() - self.window;
        self.records.retain(|_, record| {
            record.failure_count > 0
                || record.flags != SourceFlags::default()
                || record.timestamps.back().is_some_and(|&ts| ts >= cutoff)
        });
    }
}

/// Trim timestamps that have aged past the tracking window, then append.
fn push_timestamp(record: &mut SourceRecord, now: DateTime<Utc>, window: Duration) {
    let cutoff = now - window;
    while record.timestamps.front().is_some_and(|&ts| ts < cutoff) {
        record.timestamps.pop_front();
    }
    record.timestamps.push_back(now);
}

/// Check whether an address falls in a private or reserved range.
pub fn is_reserved_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()             // 127.0.0.0/8
                || v4.is_private()        // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
                || v4.is_link_local()     // 169.254.0.0/16
                || v4.is_broadcast()      // 255.255.255.255
                || v4.is_unspecified()    // 0.0.0.0
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
