//! Lookup status and engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fresh entry returned without running a producer.
    Hit,
    /// This caller started the producer.
    Miss,
    /// Joined a computation another caller had already started.
    Joined,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
            Self::Joined => write!(f, "JOINED"),
        }
    }
}

/// Running counters for a cache engine.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    producer_errors: AtomicU64,
    invalidated: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_join(&self) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_producer_error(&self) {
        self.producer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidated(&self, count: usize) {
        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, tags: usize, in_flight: usize) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            producer_errors: self.producer_errors.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries,
            tags,
            in_flight,
        }
    }
}

/// Point-in-time view of engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Lookups served from a fresh entry.
    pub hits: u64,
    /// Lookups that started a producer.
    pub misses: u64,
    /// Lookups that joined an in-flight producer.
    pub joins: u64,
    /// Producer runs that failed or panicked.
    pub producer_errors: u64,
    /// Entries removed by tag/key invalidation or `clear`.
    pub invalidated: u64,
    /// Entries removed to respect the capacity bound.
    pub evicted: u64,
    /// Entries removed after their TTL passed.
    pub expired: u64,
    /// Entries currently stored.
    pub entries: usize,
    /// Distinct tags currently indexed.
    pub tags: usize,
    /// Computations currently in flight.
    pub in_flight: usize,
}

impl StatsSnapshot {
    /// Total lookups observed.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.joins
    }

    /// Share of lookups that ran no producer of their own (hits and joins).
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            return 0.0;
        }
        (self.hits + self.joins) as f64 / lookups as f64
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as human-readable summary.
    pub fn to_summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Lookups: {} (hit {}, miss {}, joined {}) ratio {:.2}",
            self.lookups(),
            self.hits,
            self.misses,
            self.joins,
            self.hit_ratio()
        ));
        lines.push(format!(
            "  Entries: {} across {} tags, {} in flight",
            self.entries, self.tags, self.in_flight
        ));
        lines.push(format!(
            "  Removed: {} invalidated, {} evicted, {} expired",
            self.invalidated, self.evicted, self.expired
        ));
        if self.producer_errors > 0 {
            lines.push(format!("  Producer errors: {}", self.producer_errors));
        }

        lines.join("\n")
    }
}
