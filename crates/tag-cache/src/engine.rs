//! The tag-indexed cache engine.
//!
//! All bookkeeping (entries, tag index, recency order, in-flight registry)
//! lives behind one mutex that is never held across an `.await`. Producers run
//! on spawned tasks, so a computation finishes and commits even when every
//! caller waiting on it has gone away.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, EntryView};
use crate::error::{CacheError, CacheResult};
use crate::index::{RecencyOrder, TagIndex};
use crate::key::normalize_tags;
use crate::policy::CacheOptions;
use crate::stats::{CacheStats, CacheStatus, StatsSnapshot};

type SharedResult<V> = Shared<BoxFuture<'static, CacheResult<V>>>;

/// A value together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<V> {
    pub value: V,
    pub status: CacheStatus,
}

/// A computation registered for a key but not yet committed.
struct InFlight<V> {
    id: u64,
    tags: BTreeSet<String>,
    /// Set when the key or one of `tags` is invalidated mid-flight; the
    /// result still reaches its waiters but is not stored.
    discard: bool,
    result: SharedResult<V>,
}

struct State<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tags: TagIndex,
    recency: RecencyOrder,
    in_flight: HashMap<String, InFlight<V>>,
    next_flight: u64,
}

impl<V> Default for State<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            tags: TagIndex::default(),
            recency: RecencyOrder::default(),
            in_flight: HashMap::new(),
            next_flight: 0,
        }
    }
}

impl<V> State<V> {
    fn insert_entry(&mut self, key: &str, mut entry: CacheEntry<V>) {
        self.remove_entry(key);
        self.tags.attach(key, &entry.tags);
        entry.last_access = self.recency.touch(key, None);
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove an entry and every index reference to it.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.tags.detach(key, &entry.tags);
        self.recency.remove(entry.last_access);
        Some(entry)
    }

    /// Evict least recently used entries until one more fits under `capacity`.
    fn make_room(&mut self, key: &str, capacity: usize) -> usize {
        if self.entries.contains_key(key) {
            return 0;
        }

        let mut evicted = 0;
        while self.entries.len() >= capacity {
            let Some(oldest) = self.recency.oldest().map(str::to_string) else {
                break;
            };
            self.remove_entry(&oldest);
            debug!(key = %oldest, "evicted least recently used entry");
            evicted += 1;
        }
        evicted
    }

    fn invalidate_tag(&mut self, tag: &str) -> usize {
        let mut removed = 0;
        for key in self.tags.take(tag) {
            if self.remove_entry(&key).is_some() {
                removed += 1;
            }
        }
        for flight in self.in_flight.values_mut() {
            if flight.tags.contains(tag) {
                flight.discard = true;
            }
        }
        removed
    }

    fn invalidate_key(&mut self, key: &str) -> bool {
        if let Some(flight) = self.in_flight.get_mut(key) {
            flight.discard = true;
        }
        self.remove_entry(key).is_some()
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        expired.len()
    }

    /// Drop the registration for flight `id`, returning whether its result
    /// may be committed.
    fn release_flight(&mut self, key: &str, id: u64) -> bool {
        match self.in_flight.get(key) {
            Some(flight) if flight.id == id => {
                let discard = flight.discard;
                self.in_flight.remove(key);
                !discard
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        for (tag, keys) in self.tags.iter() {
            assert!(!keys.is_empty(), "empty bucket left for tag {tag}");
            for key in keys {
                let entry = self
                    .entries
                    .get(key)
                    .unwrap_or_else(|| panic!("tag {tag} references missing key {key}"));
                assert!(entry.tags.contains(tag), "entry {key} lacks indexed tag {tag}");
            }
        }
        for (key, entry) in &self.entries {
            for tag in &entry.tags {
                assert!(self.tags.contains(tag, key), "tag {tag} not indexed for {key}");
            }
        }
        assert_eq!(self.recency.len(), self.entries.len());
    }
}

struct Inner<V> {
    state: Mutex<State<V>>,
    config: CacheConfig,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        // State is only mutated by index bookkeeping that cannot panic midway.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self) -> usize {
        let removed = self.lock().sweep(Instant::now());
        self.stats.record_expired(removed);
        removed
    }

    /// Settle flight `id`: unregister it and commit a successful value.
    fn complete(
        &self,
        key: &str,
        id: u64,
        outcome: &CacheResult<V>,
        tags: BTreeSet<String>,
        ttl: Option<Duration>,
    ) where
        V: Clone,
    {
        let mut state = self.lock();
        let commit = state.release_flight(key, id);

        match outcome {
            Ok(value) if commit => {
                let evicted = match self.config.capacity() {
                    Some(capacity) => state.make_room(key, capacity),
                    None => 0,
                };
                self.stats.record_evicted(evicted);
                debug!(key, tags = ?tags, ttl = ?ttl, "committed cache entry");
                state.insert_entry(key, CacheEntry::new(value.clone(), tags, ttl));
            }
            Ok(_) => {
                debug!(key, "dropping result invalidated while in flight");
            }
            Err(err) => {
                self.stats.record_producer_error();
                warn!(key, error = %err, "cache producer failed");
            }
        }
    }
}

/// Ownership of a registered computation.
///
/// Dropping it without calling [`Flight::finish`] (its task was cancelled,
/// e.g. by runtime shutdown) unregisters the flight, and waiters observe
/// [`CacheError::Abandoned`].
struct Flight<V> {
    inner: Arc<Inner<V>>,
    key: String,
    id: u64,
    tags: BTreeSet<String>,
    ttl: Option<Duration>,
    sender: Option<oneshot::Sender<CacheResult<V>>>,
}

impl<V: Clone> Flight<V> {
    fn finish(mut self, outcome: CacheResult<V>) {
        let tags = std::mem::take(&mut self.tags);
        self.inner.complete(&self.key, self.id, &outcome, tags, self.ttl);

        if let Some(sender) = self.sender.take() {
            // No receivers left is fine: the value is committed regardless.
            let _ = sender.send(outcome);
        }
    }
}

impl<V> Drop for Flight<V> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.inner.lock().release_flight(&self.key, self.id);
            warn!(key = %self.key, "in-flight computation abandoned");
        }
    }
}

enum Start<V, F> {
    Ready(V),
    Pending(SharedResult<V>, CacheStatus),
    /// The running computation was invalidated; wait it out, then retry with
    /// the returned producer.
    Superseded(SharedResult<V>, F),
}

/// Tag-indexed cache with in-flight de-duplication.
///
/// Cloning is cheap and every clone shares the same store, so a single
/// engine can serve a whole process or be scoped to one request.
///
/// Lookups need a tokio runtime because producers run on spawned tasks.
///
/// # Example
///
/// ```rust,no_run
/// use tag_cache::{CacheConfig, CacheOptions, TagCache};
///
/// # async fn example() -> Result<(), tag_cache::CacheError> {
/// let cache: TagCache<Vec<String>> = TagCache::new(CacheConfig::new().with_max_entries(1000));
///
/// let products = cache
///     .get(
///         "products:all",
///         || async { Ok(vec!["lamp".to_string()]) },
///         CacheOptions::new().tag("products"),
///     )
///     .await?;
/// assert_eq!(products.len(), 1);
///
/// // After a mutation:
/// cache.invalidate_tag("products");
/// # Ok(())
/// # }
/// ```
pub struct TagCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TagCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for TagCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<V> std::fmt::Debug for TagCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TagCache")
            .field("entries", &state.entries.len())
            .field("tags", &state.tags.tag_count())
            .field("in_flight", &state.in_flight.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<V> TagCache<V> {
    /// Create an engine with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                config,
                stats: CacheStats::default(),
            }),
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Remove every entry carrying `tag`. Returns how many were removed.
    ///
    /// Also prevents any in-flight computation carrying `tag` from being
    /// stored. Invalidating an unknown tag is a no-op.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self.inner.lock().invalidate_tag(tag);
        self.inner.stats.record_invalidated(removed);
        debug!(tag, removed, "invalidated cache tag");
        removed
    }

    /// Invalidate several tags in one critical section.
    pub fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let removed = {
            let mut state = self.inner.lock();
            tags.iter()
                .map(|tag| state.invalidate_tag(tag.as_ref()))
                .sum::<usize>()
        };
        self.inner.stats.record_invalidated(removed);
        debug!(tags = tags.len(), removed, "invalidated cache tags");
        removed
    }

    /// Remove the entry for `key`. Returns whether one existed.
    ///
    /// An in-flight computation for `key` still answers its waiters but is
    /// not stored.
    pub fn invalidate_key(&self, key: &str) -> bool {
        let removed = self.inner.lock().invalidate_key(key);
        if removed {
            self.inner.stats.record_invalidated(1);
        }
        debug!(key, removed, "invalidated cache key");
        removed
    }

    /// Remove every entry whose TTL has passed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let removed = self.inner.sweep();
        if removed > 0 {
            debug!(removed, "evicted expired cache entries");
        }
        removed
    }

    /// Remove all entries; in-flight computations will not be stored.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut state = self.inner.lock();
            let removed = state.entries.len();
            state.entries.clear();
            state.tags.clear();
            state.recency.clear();
            for flight in state.in_flight.values_mut() {
                flight.discard = true;
            }
            removed
        };
        self.inner.stats.record_invalidated(removed);
        debug!(removed, "cleared cache");
        removed
    }

    /// Whether a fresh entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently carrying `tag`, sorted.
    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        self.inner.lock().tags.keys(tag)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        let (entries, tags, in_flight) = {
            let state = self.inner.lock();
            (state.entries.len(), state.tags.tag_count(), state.in_flight.len())
        };
        self.inner.stats.snapshot(entries, tags, in_flight)
    }
}

impl<V> TagCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Return the cached value for `key`, computing it with `producer` on a miss.
    ///
    /// Concurrent lookups of the same key share one producer run and all
    /// observe its outcome. Failures are returned to every joined caller and
    /// are never cached. A computation invalidated while running is never
    /// joined; later lookups wait for it to settle and then compute afresh.
    pub async fn get<F, Fut>(&self, key: &str, producer: F, options: CacheOptions) -> CacheResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_with_status(key, producer, options)
            .await
            .map(|lookup| lookup.value)
    }

    /// Like [`get`](Self::get), also reporting how the value was obtained.
    pub async fn get_with_status<F, Fut>(
        &self,
        key: &str,
        mut producer: F,
        options: CacheOptions,
    ) -> CacheResult<Lookup<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        loop {
            match self.start(key, producer, &options) {
                Start::Ready(value) => {
                    return Ok(Lookup {
                        value,
                        status: CacheStatus::Hit,
                    })
                }
                Start::Pending(result, status) => {
                    let value = result.await?;
                    return Ok(Lookup { value, status });
                }
                Start::Superseded(stale, returned) => {
                    // Its outcome predates the invalidation, so it is not ours.
                    let _ = stale.await;
                    producer = returned;
                }
            }
        }
    }

    /// Like [`get`](Self::get), but stop waiting after `timeout`.
    ///
    /// Giving up only affects this caller: the shared computation keeps
    /// running and its value is still stored for later lookups.
    pub async fn get_with_timeout<F, Fut>(
        &self,
        key: &str,
        producer: F,
        options: CacheOptions,
        timeout: Duration,
    ) -> CacheResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        match tokio::time::timeout(timeout, self.get(key, producer, options)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(key, timeout = ?timeout, "caller stopped waiting for cache value");
                Err(CacheError::Timeout(timeout))
            }
        }
    }

    /// Snapshot of the entry for `key` without refreshing its recency.
    pub fn peek(&self, key: &str) -> Option<EntryView<V>> {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.view(key, now))
    }

    /// Sweep expired entries every `every` until the engine is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let inner: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.sweep();
                if removed > 0 {
                    debug!(removed, "sweeper evicted expired cache entries");
                }
            }
            trace!("cache sweeper stopped");
        })
    }

    /// Start the sweeper at the configured interval, if one is configured.
    pub fn spawn_configured_sweeper(&self) -> Option<JoinHandle<()>> {
        self.inner
            .config
            .sweep_interval()
            .map(|every| self.spawn_sweeper(every))
    }

    /// Serve a hit, join a running computation, or launch a new one.
    fn start<F, Fut>(&self, key: &str, producer: F, options: &CacheOptions) -> Start<V, F>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let (flight, result) = {
            let now = Instant::now();
            let mut state = self.inner.lock();

            let expired = match state.entries.get(key) {
                Some(entry) => entry.is_expired(now),
                None => false,
            };
            if expired {
                state.remove_entry(key);
                self.inner.stats.record_expired(1);
                trace!(key, "expired entry removed on access");
            } else if let Some(previous) = state.entries.get(key).map(|e| e.last_access) {
                let tick = state.recency.touch(key, Some(previous));
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.last_access = tick;
                    self.inner.stats.record_hit();
                    trace!(key, "cache hit");
                    return Start::Ready(entry.value.clone());
                }
            }

            if let Some(flight) = state.in_flight.get(key) {
                if flight.discard {
                    trace!(key, "waiting out invalidated computation");
                    return Start::Superseded(flight.result.clone(), producer);
                }
                self.inner.stats.record_join();
                trace!(key, "joined in-flight computation");
                return Start::Pending(flight.result.clone(), CacheStatus::Joined);
            }

            self.inner.stats.record_miss();
            let id = state.next_flight;
            state.next_flight += 1;

            let tags = normalize_tags(key, &options.tags);
            let ttl = options.expiry.resolve(self.inner.config.default_ttl());
            let (sender, receiver) = oneshot::channel();
            let result: SharedResult<V> = receiver
                .map(|received| received.unwrap_or(Err(CacheError::Abandoned)))
                .boxed()
                .shared();

            state.in_flight.insert(
                key.to_string(),
                InFlight {
                    id,
                    tags: tags.clone(),
                    discard: false,
                    result: result.clone(),
                },
            );
            debug!(key, "cache miss, starting producer");

            (
                Flight {
                    inner: Arc::clone(&self.inner),
                    key: key.to_string(),
                    id,
                    tags,
                    ttl,
                    sender: Some(sender),
                },
                result,
            )
        };

        // Called outside the lock.
        let computation = match panic::catch_unwind(AssertUnwindSafe(producer)) {
            Ok(computation) => computation,
            Err(payload) => {
                flight.finish(Err(CacheError::panicked(payload)));
                return Start::Pending(result, CacheStatus::Miss);
            }
        };
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(computation).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(CacheError::producer(err)),
                Err(payload) => Err(CacheError::panicked(payload)),
            };
            flight.finish(outcome);
        });

        Start::Pending(result, CacheStatus::Miss)
    }
}
