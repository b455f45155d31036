use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::event::EventCategory;

/// Key addressing one sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKey {
    /// Guild-scoped window for one category.
    Guild(u64, EventCategory),
    /// Per-author window for message bursts: (guild_id, user_id).
    Actor(u64, u64),
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guild(gid, cat) => write!(f, "{gid}:{}", cat.as_str()),
            Self::Actor(gid, uid) => write!(f, "{gid}:actor:{uid}"),
        }
    }
}

/// Bounded FIFO queues of event timestamps, one per key.
///
/// Entries leave a live window only through overflow eviction or an explicit
/// clear; nothing ages out of a window on its own. Whole windows are
/// reclaimed by [`WindowTracker::sweep_stale`] once their newest entry has
/// fallen behind the active timeframe.
#[derive(Debug, Default)]
pub struct WindowTracker {
    windows: HashMap<WindowKey, VecDeque<DateTime<Utc>>>,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamp, evicting from the front while the queue exceeds
    /// `capacity`. Returns the resulting length. Capacity is taken per call
    /// so a shrunk runtime threshold re-bounds a window on its next touch.
    pub fn record(&mut self, key: WindowKey, at: DateTime<Utc>, capacity: usize) -> usize {
        let q = self.windows.entry(key).or_default();
        q.push_back(at);
        while q.len() > capacity {
            q.pop_front();
        }
        q.len()
    }

    /// Drop the key entirely.
    pub fn clear(&mut self, key: &WindowKey) {
        self.windows.remove(key);
    }

    pub fn peek_oldest(&self, key: &WindowKey) -> Option<DateTime<Utc>> {
        self.windows.get(key).and_then(|q| q.front().copied())
    }

    pub fn len(&self, key: &WindowKey) -> usize {
        self.windows.get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Number of live keys.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Remove every window whose newest entry is older than `max_age`.
    /// Such a window cannot satisfy a trigger again without fresh events,
    /// so dropping it changes nothing observable. Returns removed key count.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, q| q.back().is_some_and(|newest| now - *newest <= max_age));
        before - self.windows.len()
    }

    /// Serializable copy: key label to unix-second timestamps.
    pub fn snapshot(&self) -> HashMap<String, Vec<i64>> {
        self.windows
            .iter()
            .map(|(k, q)| (k.to_string(), q.iter().map(DateTime::timestamp).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key(gid: u64) -> WindowKey {
        WindowKey::Guild(gid, EventCategory::MessageDelete)
    }

    #[test]
    fn record_evicts_oldest_past_capacity() {
        let mut w = WindowTracker::new();
        for i in 0..7 {
            w.record(key(1), ts(i), 5);
        }
        assert_eq!(w.len(&key(1)), 5);
        assert_eq!(w.peek_oldest(&key(1)), Some(ts(2)));
    }

    #[test]
    fn shrunk_capacity_rebounds_on_next_record() {
        let mut w = WindowTracker::new();
        for i in 0..5 {
            w.record(key(1), ts(i), 5);
        }
        let len = w.record(key(1), ts(5), 3);
        assert_eq!(len, 3);
        assert_eq!(w.peek_oldest(&key(1)), Some(ts(3)));
    }

    #[test]
    fn clear_drops_the_key() {
        let mut w = WindowTracker::new();
        w.record(key(1), ts(0), 5);
        w.clear(&key(1));
        assert_eq!(w.len(&key(1)), 0);
        assert_eq!(w.peek_oldest(&key(1)), None);
        assert!(w.is_empty());
    }

    #[test]
    fn keys_are_isolated() {
        let mut w = WindowTracker::new();
        w.record(key(1), ts(0), 5);
        w.record(WindowKey::Actor(1, 42), ts(1), 5);
        assert_eq!(w.len(&key(1)), 1);
        assert_eq!(w.len(&WindowKey::Actor(1, 42)), 1);
        w.clear(&key(1));
        assert_eq!(w.len(&WindowKey::Actor(1, 42)), 1);
    }

    #[test]
    fn sweep_removes_only_dead_windows() {
        let mut w = WindowTracker::new();
        w.record(key(1), ts(0), 5);
        w.record(key(2), ts(95), 5);
        let removed = w.sweep_stale(ts(100), Duration::seconds(10));
        assert_eq!(removed, 1);
        assert_eq!(w.len(&key(1)), 0);
        assert_eq!(w.len(&key(2)), 1);
    }

    #[test]
    fn sweep_keeps_windows_with_any_fresh_entry() {
        let mut w = WindowTracker::new();
        // Old prefix, fresh tail: the newest entry keeps the window alive
        // and the stale prefix is left for FIFO displacement.
        w.record(key(1), ts(0), 5);
        w.record(key(1), ts(99), 5);
        let removed = w.sweep_stale(ts(100), Duration::seconds(10));
        assert_eq!(removed, 0);
        assert_eq!(w.peek_oldest(&key(1)), Some(ts(0)));
    }

    #[test]
    fn snapshot_labels_keys() {
        let mut w = WindowTracker::new();
        w.record(key(7), ts(0), 5);
        w.record(WindowKey::Actor(7, 9), ts(1), 5);
        let snap = w.snapshot();
        assert_eq!(snap["7:message_delete"], vec![ts(0).timestamp()]);
        assert_eq!(snap["7:actor:9"], vec![ts(1).timestamp()]);
    }
}
