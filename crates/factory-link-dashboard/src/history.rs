//! Bounded per-entity time series.
//!
//! Push and pull paths can deliver the same state twice, in any order. A
//! snapshot is kept only if it is the first for its key, or strictly newer
//! than the last one by at least the minimum interval; everything else is
//! discarded without error.

use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Minimum spacing between kept snapshots of one key.
pub const MIN_SNAP_INTERVAL_MS: u64 = 2000;
/// Snapshots kept per key.
pub const MAX_HISTORY: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<T> {
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    pub metrics: T,
}

pub struct HistoryStore<K, T> {
    series: HashMap<K, VecDeque<Snapshot<T>>>,
    min_interval_ms: u64,
    capacity: usize,
}

impl<K: Eq + Hash, T> Default for HistoryStore<K, T> {
    fn default() -> Self {
        Self::with_limits(MIN_SNAP_INTERVAL_MS, MAX_HISTORY)
    }
}

impl<K: Eq + Hash, T> HistoryStore<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(min_interval_ms: u64, capacity: usize) -> Self {
        Self {
            series: HashMap::new(),
            min_interval_ms,
            capacity: capacity.max(1),
        }
    }

    /// Append `metrics` at `now` for `key`. Returns whether it was kept.
    pub fn record(&mut self, key: K, now: u64, metrics: T) -> bool {
        let series = self.series.entry(key).or_default();
        if let Some(last) = series.back()
            && (now <= last.time || now - last.time < self.min_interval_ms)
        {
            return false;
        }
        series.push_back(Snapshot { time: now, metrics });
        while series.len() > self.capacity {
            series.pop_front();
        }
        true
    }

    /// Snapshots of `key`, oldest first.
    pub fn series<'a, Q>(
        &'a self,
        key: &Q,
    ) -> impl Iterator<Item = &'a Snapshot<T>> + use<'a, K, T, Q>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.series.get(key).into_iter().flatten()
    }

    pub fn latest<Q>(&self, key: &Q) -> Option<&Snapshot<T>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.series.get(key).and_then(VecDeque::back)
    }

    pub fn len<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.series.get(key).map_or(0, VecDeque::len)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.series.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times<K: Eq + Hash>(store: &HistoryStore<K, ()>, key: &K) -> Vec<u64> {
        store.series(key).map(|s| s.time).collect()
    }

    #[test]
    fn too_close_then_far_enough() {
        let mut store = HistoryStore::new();
        assert!(store.record(1, 0, ()));
        assert!(!store.record(1, 1000, ()));
        assert!(store.record(1, 2500, ()));
        assert_eq!(times(&store, &1), vec![0, 2500]);
    }

    #[test]
    fn exact_interval_is_accepted() {
        let mut store = HistoryStore::new();
        assert!(store.record("a", 10_000, ()));
        assert!(store.record("a", 12_000, ()));
    }

    #[test]
    fn stale_and_duplicate_times_never_grow() {
        let mut store = HistoryStore::new();
        store.record(7, 10_000, ());
        for t in [10_000, 9_000, 0, 11_999] {
            assert!(!store.record(7, t, ()));
        }
        assert_eq!(store.len(&7), 1);
    }

    #[test]
    fn keeps_the_most_recent_entries() {
        let mut store = HistoryStore::new();
        for i in 0..125u64 {
            assert!(store.record(1, i * MIN_SNAP_INTERVAL_MS, ()));
        }
        let kept = times(&store, &1);
        assert_eq!(kept.len(), MAX_HISTORY);
        assert_eq!(kept[0], 5 * MIN_SNAP_INTERVAL_MS);
        assert_eq!(*kept.last().unwrap(), 124 * MIN_SNAP_INTERVAL_MS);
    }

    #[test]
    fn keys_are_independent() {
        let mut store = HistoryStore::new();
        assert!(store.record("a", 5_000, ()));
        assert!(store.record("b", 5_500, ()));
        assert!(!store.record("b", 1_000, ()));
        assert!(store.record("a", 7_000, ()));
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 1);
        assert_eq!(store.len("c"), 0);
    }

    #[test]
    fn string_keys_borrow_as_str() {
        let mut store: HistoryStore<String, f64> = HistoryStore::new();
        store.record("Build_SmelterMk1_C_1".to_string(), 0, 97.5);
        assert_eq!(store.latest("Build_SmelterMk1_C_1").unwrap().metrics, 97.5);
        assert!(store.latest("missing").is_none());
    }
}
