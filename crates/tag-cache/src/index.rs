//! Reverse tag index and LRU recency order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Maps each tag to the keys of entries currently carrying it.
///
/// Buckets are dropped as soon as they become empty, so `tag_count` only
/// counts tags that still reference at least one entry.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    buckets: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    /// Register `key` under each of `tags`.
    pub(crate) fn attach(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            self.buckets
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove `key` from each of `tags`. Missing buckets are ignored.
    pub(crate) fn detach(&mut self, key: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(bucket) = self.buckets.get_mut(tag) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(tag);
                }
            }
        }
    }

    /// Remove and return the whole bucket for `tag`.
    pub(crate) fn take(&mut self, tag: &str) -> HashSet<String> {
        self.buckets.remove(tag).unwrap_or_default()
    }

    /// Keys carrying `tag`, sorted.
    pub(crate) fn keys(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .buckets
            .get(tag)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, tag: &str, key: &str) -> bool {
        self.buckets
            .get(tag)
            .is_some_and(|bucket| bucket.contains(key))
    }

    pub(crate) fn tag_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.buckets.iter()
    }
}

/// Least-recently-used order over stored keys.
///
/// Every access hands out a new, strictly increasing tick; the entry with
/// the smallest tick is the eviction candidate.
#[derive(Debug, Default)]
pub(crate) struct RecencyOrder {
    by_tick: BTreeMap<u64, String>,
    next_tick: u64,
}

impl RecencyOrder {
    /// Move `key` to the most-recent position, replacing its `previous` tick.
    pub(crate) fn touch(&mut self, key: &str, previous: Option<u64>) -> u64 {
        if let Some(previous) = previous {
            self.by_tick.remove(&previous);
        }
        self.next_tick += 1;
        self.by_tick.insert(self.next_tick, key.to_string());
        self.next_tick
    }

    pub(crate) fn remove(&mut self, tick: u64) {
        self.by_tick.remove(&tick);
    }

    /// Least recently used key.
    pub(crate) fn oldest(&self) -> Option<&str> {
        self.by_tick.values().next().map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_tick.len()
    }

    pub(crate) fn clear(&mut self) {
        self.by_tick.clear();
    }
}
