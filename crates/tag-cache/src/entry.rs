//! Stored cache entries and read-only views of them.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Freshness of a stored entry as seen by [`TagCache::peek`](crate::TagCache::peek).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Servable as-is.
    Fresh,
    /// TTL passed but not yet swept; the next lookup recomputes it.
    Stale,
}

/// A committed value. Never handed out by reference.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) created_at: Instant,
    pub(crate) created_wall: DateTime<Utc>,
    pub(crate) ttl: Option<Duration>,
    /// Recency tick, see [`RecencyOrder`](crate::index::RecencyOrder).
    pub(crate) last_access: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, tags: BTreeSet<String>, ttl: Option<Duration>) -> Self {
        Self {
            value,
            tags,
            created_at: Instant::now(),
            created_wall: Utc::now(),
            ttl,
            last_access: 0,
        }
    }

    pub(crate) fn expires_at(&self) -> Option<Instant> {
        self.ttl.and_then(|ttl| self.created_at.checked_add(ttl))
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

impl<V: Clone> CacheEntry<V> {
    pub(crate) fn view(&self, key: &str, now: Instant) -> EntryView<V> {
        let state = if self.is_expired(now) {
            EntryState::Stale
        } else {
            EntryState::Fresh
        };

        let expires_at = self.ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| self.created_wall.checked_add_signed(ttl))
        });

        EntryView {
            key: key.to_string(),
            value: self.value.clone(),
            tags: self.tags.iter().cloned().collect(),
            state,
            created_at: self.created_wall,
            expires_at,
            age: now.saturating_duration_since(self.created_at),
            remaining_ttl: self
                .expires_at()
                .map(|at| at.saturating_duration_since(now)),
        }
    }
}

/// Snapshot of an entry. Mutating it does not affect the cache.
#[derive(Debug, Clone)]
pub struct EntryView<V> {
    pub key: String,
    pub value: V,
    /// Tags, sorted.
    pub tags: Vec<String>,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    /// `None` if the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub age: Duration,
    /// `None` if the entry never expires; zero once stale.
    pub remaining_ttl: Option<Duration>,
}

impl<V> EntryView<V> {
    pub fn is_fresh(&self) -> bool {
        self.state == EntryState::Fresh
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
