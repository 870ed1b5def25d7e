//! Per-Channel Append Log
//!
//! Ordered oldest-to-newest, bounded by a retention policy that combines a
//! hard floor on the entry count with a maximum age. Eviction removes a
//! contiguous prefix with a single shift of the backing vector.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::Envelope;

/// How long and how many messages a channel keeps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Never trim below this many entries, however old they are
    pub keep_min: usize,
    /// Entries older than this are evictable once above `keep_min`
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_min: 50,
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// The instant before which an entry counts as expired
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.max_age) {
            Ok(age) => now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// Recently published messages for one channel, newest at the tail
#[derive(Debug, Default)]
pub struct ChannelLog {
    entries: Vec<Arc<Envelope>>,
}

impl ChannelLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the newest entry
    #[must_use]
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.timestamp())
    }

    /// Append an entry
    ///
    /// Callers guarantee the entry is not older than the current tail.
    pub fn push(&mut self, entry: Arc<Envelope>) {
        debug_assert!(self
            .newest_timestamp()
            .map_or(true, |newest| newest <= entry.timestamp()));
        self.entries.push(entry);
    }

    /// The earliest entry strictly after `after`
    #[must_use]
    pub fn first_after(&self, after: DateTime<Utc>) -> Option<&Arc<Envelope>> {
        let idx = self.entries.partition_point(|e| e.timestamp() <= after);
        self.entries.get(idx)
    }

    /// Entries strictly after `after` (all when `None`), newest first
    #[must_use]
    pub fn newest_first(&self, after: Option<DateTime<Utc>>) -> Vec<Arc<Envelope>> {
        let start = match after {
            Some(after) => self.entries.partition_point(|e| e.timestamp() <= after),
            None => 0,
        };
        self.entries[start..].iter().rev().cloned().collect()
    }

    /// The newest `max` entries in publish order (all when `max` is zero)
    #[must_use]
    pub fn tail(&self, max: usize) -> &[Arc<Envelope>] {
        let start = if max > 0 && self.entries.len() > max {
            self.entries.len() - max
        } else {
            0
        };
        &self.entries[start..]
    }

    /// Evict expired entries from the front
    ///
    /// Walks oldest-first and stops at the first entry that is either inside
    /// the age window or whose removal would leave fewer than `keep_min`
    /// entries. Returns how many entries were removed.
    pub fn trim(&mut self, now: DateTime<Utc>, policy: &RetentionPolicy) -> usize {
        let len = self.entries.len();
        if len <= policy.keep_min {
            return 0;
        }

        let cutoff = policy.cutoff(now);
        let mut trim = 0;
        while trim < len
            && len - trim > policy.keep_min
            && self.entries[trim].timestamp() < cutoff
        {
            trim += 1;
        }

        if trim > 0 {
            self.entries.drain(..trim);
        }
        trim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn entry(secs: i64) -> Arc<Envelope> {
        let mut msg = Message::assistant("c", format!("m{secs}"));
        msg.timestamp = t0() + chrono::Duration::seconds(secs);
        Arc::new(Envelope::new(msg))
    }

    fn log_with(offsets: impl IntoIterator<Item = i64>) -> ChannelLog {
        let mut log = ChannelLog::new();
        for s in offsets {
            log.push(entry(s));
        }
        log
    }

    fn bodies(entries: &[Arc<Envelope>]) -> Vec<String> {
        entries.iter().map(|e| e.message().body.clone()).collect()
    }

    #[test]
    fn test_first_after_returns_earliest_newer_entry() {
        let log = log_with([0, 10, 20]);
        assert_eq!(log.first_after(t0() - chrono::Duration::seconds(1)).unwrap().message().body, "m0");
        assert_eq!(log.first_after(t0()).unwrap().message().body, "m10");
        assert_eq!(log.first_after(t0() + chrono::Duration::seconds(15)).unwrap().message().body, "m20");
        assert!(log.first_after(t0() + chrono::Duration::seconds(20)).is_none());
    }

    #[test]
    fn test_newest_first_ordering_and_cursor() {
        let log = log_with([0, 10, 20, 30]);
        assert_eq!(bodies(&log.newest_first(None)), ["m30", "m20", "m10", "m0"]);
        assert_eq!(
            bodies(&log.newest_first(Some(t0() + chrono::Duration::seconds(10)))),
            ["m30", "m20"]
        );
        assert!(log.newest_first(Some(t0() + chrono::Duration::seconds(30))).is_empty());
    }

    #[test]
    fn test_tail() {
        let log = log_with([0, 1, 2, 3, 4]);
        assert_eq!(bodies(log.tail(2)), ["m3", "m4"]);
        assert_eq!(log.tail(0).len(), 5);
        assert_eq!(log.tail(50).len(), 5);
    }

    #[test]
    fn test_trim_never_goes_below_keep_min() {
        let mut log = log_with(0..10);
        let policy = RetentionPolicy {
            keep_min: 4,
            max_age: Duration::from_secs(60),
        };
        // Everything is a day old
        let removed = log.trim(t0() + chrono::Duration::days(1), &policy);
        assert_eq!(removed, 6);
        assert_eq!(log.len(), 4);
        assert_eq!(bodies(log.tail(0)), ["m6", "m7", "m8", "m9"]);
    }

    #[test]
    fn test_trim_keeps_everything_inside_window() {
        let mut log = log_with(0..100);
        let policy = RetentionPolicy {
            keep_min: 10,
            max_age: Duration::from_secs(3600),
        };
        assert_eq!(log.trim(t0() + chrono::Duration::seconds(200), &policy), 0);
        assert_eq!(log.len(), 100);
    }

    #[test]
    fn test_trim_age_eviction_above_floor() {
        // 60 entries one minute apart; the oldest 20 fall outside a 1h window.
        let mut log = log_with((0..60).map(|m| m * 60));
        let now = t0() + chrono::Duration::minutes(80);

        let mut policy = RetentionPolicy {
            keep_min: 50,
            max_age: Duration::from_secs(3600),
        };
        let mut floored = log_with((0..60).map(|m| m * 60));
        floored.trim(now, &policy);
        // max(keep_min, not_expired) = max(50, 40)
        assert_eq!(floored.len(), 50);

        policy.keep_min = 10;
        log.trim(now, &policy);
        // max(10, 40)
        assert_eq!(log.len(), 40);
        assert_eq!(log.tail(0)[0].message().body, "m1200");
    }

    #[test]
    fn test_trim_stops_at_first_fresh_entry() {
        let mut log = ChannelLog::new();
        for s in [0, 1, 5000, 5001] {
            log.push(entry(s));
        }
        let policy = RetentionPolicy {
            keep_min: 1,
            max_age: Duration::from_secs(100),
        };
        assert_eq!(log.trim(t0() + chrono::Duration::seconds(5050), &policy), 2);
        assert_eq!(bodies(log.tail(0)), ["m5000", "m5001"]);
    }

    #[test]
    fn test_trim_noop_at_or_below_floor() {
        let mut log = log_with(0..3);
        let policy = RetentionPolicy {
            keep_min: 3,
            max_age: Duration::ZERO,
        };
        assert_eq!(log.trim(t0() + chrono::Duration::days(365), &policy), 0);
        assert_eq!(log.len(), 3);
    }
}
