//! # Cache Facade
//!
//! Composes the entry index, the in-flight load registry and the batch
//! buckets into the public cache: an `Arc`-shared handle whose loading
//! operations collapse concurrent duplicate work.
//!
//! ## Control Flow
//!
//! ```text
//!   get_with(key, loader) / get_batched(key, batch_loader)
//!        │
//!        ▼
//!   ┌─────────────────┐  fresh   ┌──────────────────────────────┐
//!   │ index lookup    │────────► │ hit: move to MRU, return     │
//!   └────────┬────────┘          └──────────────────────────────┘
//!            │ absent / expired
//!            ▼
//!   ┌─────────────────┐  found   ┌──────────────────────────────┐
//!   │ in-flight slot? │────────► │ attach as waiter, await      │
//!   └────────┬────────┘          └──────────────────────────────┘
//!            │ none: open slot, become leader
//!            ▼
//!   ┌───────────────────────────────────────────────────────────┐
//!   │ unary: spawn driver running the loader                    │
//!   │ batch: enrol in the loader's bucket; first enrolment arms │
//!   │        the delayed flush, reaching max_batch_size flushes │
//!   │        immediately                                        │
//!   └────────┬──────────────────────────────────────────────────┘
//!            │ on completion (driver/flush task)
//!            ▼
//!   insert into index ── fulfil promise ── clear slot
//! ```
//!
//! ## Operations
//!
//! | Method             | Suspends | Description                             |
//! |--------------------|----------|-----------------------------------------|
//! | `get`              | no       | Plain lookup; absent → `None`           |
//! | `get_with[_ttl]`   | yes      | Lookup, else load via single-flight     |
//! | `get_batched[_ttl]`| yes      | Lookup, else load via batch coalescing  |
//! | `set[_ttl]`        | no       | Insert/overwrite, may evict             |
//! | `delete`           | no       | Remove entry; in-flight loads unaffected|
//! | `clear`            | no       | Drop all entries; loads/batches finish  |
//! | `warmup`           | yes      | Sequentially preload absent keys        |
//! | `metrics`          | no       | Counter snapshot                        |
//!
//! ## Concurrency Model
//!
//! All index, slot and bucket mutations happen under one `parking_lot`
//! mutex, held only across synchronous sections — never across an await.
//! Loads and flushes run in spawned tasks holding their own handle to the
//! shared state, which yields the cancellation contract: cancelling a caller
//! abandons only that caller's wait; the underlying load runs to completion
//! and still populates the cache for its peers.
//!
//! A `set` racing an in-flight load is not guaranteed to win: whichever
//! insert runs later is the value observed afterwards. Waiters on the load
//! always receive the load's outcome, never the racing `set`'s value, and a
//! failed load propagates its error even if a `set` landed meanwhile.
//! Callers needing last-write-wins follow their `set` with `delete`.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;

use crate::batch::{BatchLoader, BatchOutcome};
use crate::clock::Clock;
use crate::error::CacheError;
use crate::flight::Promise;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::store::{Lookup, TtlLru};

/// Expired entries dropped opportunistically per foreground operation.
const SWEEP_LIMIT: usize = 8;

/// Entry lifetime for one `set`/load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Use the cache-wide `default_ttl` (no expiry if none was configured).
    Default,
    /// Never expire.
    Never,
    /// Expire this long after insertion. A zero duration means "do not
    /// store": the loader still runs and its value is returned, but no
    /// entry is created.
    After(Duration),
}

pub(crate) struct Config {
    pub(crate) maxsize: Option<usize>,
    pub(crate) default_ttl: Option<Duration>,
    pub(crate) batch_window: Duration,
    pub(crate) max_batch_size: usize,
}

type LoadResult<V> = Result<Arc<V>, CacheError>;

struct Enrolment<K, V> {
    key: K,
    ttl: Ttl,
    promise: Promise<LoadResult<V>>,
}

/// Pending batch for one loader identity.
struct Bucket<K, V> {
    /// Distinguishes this bucket from successors under the same loader, so
    /// a stale delayed flush cannot touch a bucket it did not arm.
    generation: u64,
    pending: Vec<Enrolment<K, V>>,
    timer: JoinHandle<()>,
}

struct CoreState<K, V>
where
    K: Eq + Hash + Clone,
{
    store: TtlLru<K, V>,
    inflight: FxHashMap<K, Promise<LoadResult<V>>>,
    buckets: FxHashMap<u64, Bucket<K, V>>,
    bucket_seq: u64,
}

struct Shared<K, V>
where
    K: Eq + Hash + Clone,
{
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
    state: Mutex<CoreState<K, V>>,
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Resolves a [`Ttl`] to an expiry deadline.
    ///
    /// Outer `None` means "do not store"; inner `None` means "never expire".
    fn expiry_for(&self, ttl: Ttl, now: Instant) -> Option<Option<Instant>> {
        let duration = match ttl {
            Ttl::Default => self.config.default_ttl,
            Ttl::Never => None,
            Ttl::After(duration) => Some(duration),
        };
        match duration {
            Some(duration) if duration.is_zero() => None,
            Some(duration) => Some(Some(now + duration)),
            None => Some(None),
        }
    }

    fn store_value(
        &self,
        state: &mut CoreState<K, V>,
        key: &K,
        value: Arc<V>,
        ttl: Ttl,
        now: Instant,
    ) {
        let Some(expires_at) = self.expiry_for(ttl, now) else {
            return;
        };
        state.store.insert(key.clone(), value, now, expires_at);
        let evicted = state.store.evict_excess();
        if evicted > 0 {
            self.metrics.record_evictions(evicted as u64);
            tracing::debug!(evicted, "evicted entries over capacity");
        }
    }

    fn sweep(&self, state: &mut CoreState<K, V>, now: Instant) {
        let removed = state.store.sweep_expired(now, SWEEP_LIMIT);
        if removed > 0 {
            self.metrics.record_expirations(removed as u64);
            tracing::trace!(removed, "swept expired entries");
        }
    }
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Executes one detached batch: invokes the loader, stores successful
    /// values, and settles every enrolled promise.
    async fn run_flush(&self, loader: &BatchLoader<K, V>, pending: Vec<Enrolment<K, V>>) {
        if pending.is_empty() {
            return;
        }
        let keys: Vec<K> = pending.iter().map(|enrolment| enrolment.key.clone()).collect();
        self.metrics.record_batch_call(keys.len());
        tracing::debug!(keys = keys.len(), "flushing coalesced batch");

        match loader.run(keys).await {
            Err(err) => {
                let err = CacheError::batch(err);
                let mut state = self.state.lock();
                for enrolment in pending {
                    enrolment.promise.fulfil(Err(err.clone()));
                    state.inflight.remove(&enrolment.key);
                }
            }
            Ok(BatchOutcome::Values(values)) => {
                if values.len() != pending.len() {
                    tracing::warn!(
                        expected = pending.len(),
                        got = values.len(),
                        "batch result misaligned with requested keys"
                    );
                    let err = CacheError::BatchShape {
                        expected: pending.len(),
                        got: values.len(),
                    };
                    let mut state = self.state.lock();
                    for enrolment in pending {
                        enrolment.promise.fulfil(Err(err.clone()));
                        state.inflight.remove(&enrolment.key);
                    }
                    return;
                }
                let now = self.clock.now();
                let mut state = self.state.lock();
                for (enrolment, value) in pending.into_iter().zip(values) {
                    let value = Arc::new(value);
                    self.store_value(&mut state, &enrolment.key, Arc::clone(&value), enrolment.ttl, now);
                    enrolment.promise.fulfil(Ok(value));
                    state.inflight.remove(&enrolment.key);
                }
            }
            Ok(BatchOutcome::Map(mut map)) => {
                let now = self.clock.now();
                let mut state = self.state.lock();
                for enrolment in pending {
                    match map.remove(&enrolment.key) {
                        Some(value) => {
                            let value = Arc::new(value);
                            self.store_value(
                                &mut state,
                                &enrolment.key,
                                Arc::clone(&value),
                                enrolment.ttl,
                                now,
                            );
                            enrolment.promise.fulfil(Ok(value));
                        }
                        // extra keys in the map are ignored; missing ones
                        // fail only their own waiters
                        None => enrolment.promise.fulfil(Err(CacheError::KeyAbsentInBatch)),
                    }
                    state.inflight.remove(&enrolment.key);
                }
            }
        }
    }
}

/// In-process async cache with LRU+TTL retention, single-flight load
/// coalescing and windowed batch loading.
///
/// Cloning is cheap and every clone addresses the same cache. The loading
/// operations spawn onto the ambient Tokio runtime, so they must be called
/// from within one.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<Shared<K, V>>,
}

impl<K, V> Clone for Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cache")
            .field("len", &state.store.len())
            .field("maxsize", &self.inner.config.maxsize)
            .field("inflight", &state.inflight.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn from_parts(config: Config, clock: Arc<dyn Clock>) -> Self {
        let maxsize = config.maxsize;
        Cache {
            inner: Arc::new(Shared {
                config,
                clock,
                metrics: CacheMetrics::default(),
                state: Mutex::new(CoreState {
                    store: TtlLru::new(maxsize),
                    inflight: FxHashMap::default(),
                    buckets: FxHashMap::default(),
                    bucket_seq: 0,
                }),
            }),
        }
    }

    /// Plain lookup. A fresh entry is a hit and moves to MRU; anything else
    /// is a miss and returns `None`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let shared = &self.inner;
        let now = shared.clock.now();
        let mut state = shared.state.lock();
        let outcome = state.store.lookup(key, now);
        match outcome {
            Lookup::Hit(value) => {
                shared.metrics.record_hit();
                shared.sweep(&mut state, now);
                Some(value)
            }
            Lookup::Expired => {
                shared.metrics.record_expirations(1);
                shared.metrics.record_miss();
                shared.sweep(&mut state, now);
                None
            }
            Lookup::Absent => {
                shared.metrics.record_miss();
                shared.sweep(&mut state, now);
                None
            }
        }
    }

    /// Inserts or overwrites `key` with the default TTL, moving it to MRU.
    /// May trigger eviction.
    pub fn set(&self, key: K, value: V) {
        self.set_ttl(key, value, Ttl::Default);
    }

    /// Inserts or overwrites `key` with an explicit [`Ttl`].
    pub fn set_ttl(&self, key: K, value: V, ttl: Ttl) {
        let shared = &self.inner;
        let now = shared.clock.now();
        let mut state = shared.state.lock();
        shared.store_value(&mut state, &key, Arc::new(value), ttl, now);
        shared.sweep(&mut state, now);
    }

    /// Removes an entry if present.
    ///
    /// Does not cancel an in-flight load for the key: that load, on
    /// completion, still inserts and wakes its waiters.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.state.lock().store.remove(key).is_some()
    }

    /// Drops all entries. In-flight loads and pending batches are retained
    /// and complete cleanly; counters are not reset.
    pub fn clear(&self) {
        self.inner.state.lock().store.clear();
    }

    /// Counter snapshot, internally consistent with the size gauge.
    pub fn metrics(&self) -> MetricsSnapshot {
        let state = self.inner.state.lock();
        self.inner.metrics.snapshot(state.store.len(), self.inner.config.maxsize)
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a fresh entry exists for `key`. Does not touch
    /// recency order.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().store.contains(key, now)
    }

    /// The configured capacity; `None` means unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.config.maxsize
    }

    /// Keys in recency order, MRU first. For diagnostics and tests.
    pub fn keys(&self) -> Vec<K> {
        self.inner.state.lock().store.keys()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Looks up `key`, loading it through single-flight on a miss. The
    /// stored entry gets the default TTL.
    ///
    /// See [`get_with_ttl`](Cache::get_with_ttl).
    pub async fn get_with<F, Fut>(&self, key: &K, loader: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_with_ttl(key, Ttl::Default, loader).await
    }

    /// Looks up `key`, loading it through single-flight on a miss.
    ///
    /// Concurrent misses for one key share a single loader invocation: the
    /// first caller becomes the leader and spawns the load, the rest attach
    /// as waiters, and every caller observes the same outcome. Metrics
    /// accounting: lookups served from the store *or from an in-flight
    /// load* count as hits; only the leader records a miss.
    ///
    /// The loader runs in a spawned task, so cancelling a caller — leader
    /// included — abandons only that caller's wait. A failed load reaches
    /// every waiter as the same [`CacheError`] and stores nothing; errors
    /// are never cached.
    pub async fn get_with_ttl<F, Fut>(
        &self,
        key: &K,
        ttl: Ttl,
        loader: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let shared = &self.inner;
        let waiter = {
            let now = shared.clock.now();
            let mut state = shared.state.lock();
            match state.store.lookup(key, now) {
                Lookup::Hit(value) => {
                    shared.metrics.record_hit();
                    shared.sweep(&mut state, now);
                    return Ok(value);
                }
                Lookup::Expired => shared.metrics.record_expirations(1),
                Lookup::Absent => {}
            }

            if let Some(flight) = state.inflight.get(key) {
                shared.metrics.record_hit();
                flight.subscribe()
            } else {
                shared.metrics.record_miss();
                shared.metrics.record_load();
                let promise: Promise<LoadResult<V>> = Promise::new();
                let waiter = promise.subscribe();
                state.inflight.insert(key.clone(), promise.clone());
                shared.sweep(&mut state, now);
                drop(state);

                let fut = loader();
                let driver_shared = Arc::clone(shared);
                let driver_key = key.clone();
                tokio::spawn(async move {
                    let result = match fut.await {
                        Ok(value) => Ok(Arc::new(value)),
                        Err(err) => Err(CacheError::load(err)),
                    };
                    let now = driver_shared.clock.now();
                    let mut state = driver_shared.state.lock();
                    if let Ok(value) = &result {
                        driver_shared.store_value(
                            &mut state,
                            &driver_key,
                            Arc::clone(value),
                            ttl,
                            now,
                        );
                    }
                    // fulfil before clearing the slot, so a waiter that
                    // attached a moment ago still observes the result
                    promise.fulfil(result);
                    state.inflight.remove(&driver_key);
                });
                waiter
            }
        };

        match waiter.wait().await {
            Some(result) => result,
            None => Err(CacheError::LoadAbandoned),
        }
    }

    /// Looks up `key`, loading it through the batch coalescer on a miss.
    /// The stored entry gets the default TTL.
    ///
    /// See [`get_batched_ttl`](Cache::get_batched_ttl).
    pub async fn get_batched(
        &self,
        key: &K,
        loader: &BatchLoader<K, V>,
    ) -> Result<Arc<V>, CacheError> {
        self.get_batched_ttl(key, Ttl::Default, loader).await
    }

    /// Looks up `key`, loading it through the batch coalescer on a miss.
    ///
    /// Misses for distinct keys sharing one [`BatchLoader`] are grouped:
    /// the first enrolment arms a delayed flush at `now + batch_window`,
    /// later enrolments join the pending bucket, and reaching
    /// `max_batch_size` cancels the delay and flushes immediately.
    /// Enrolments that arrive while a flush is executing start a fresh
    /// bucket with a fresh window. Per-key single-flight still applies: a
    /// second miss for an already-enrolled key attaches to its slot rather
    /// than enrolling twice.
    pub async fn get_batched_ttl(
        &self,
        key: &K,
        ttl: Ttl,
        loader: &BatchLoader<K, V>,
    ) -> Result<Arc<V>, CacheError> {
        let shared = &self.inner;
        let waiter = {
            let now = shared.clock.now();
            let mut state = shared.state.lock();
            match state.store.lookup(key, now) {
                Lookup::Hit(value) => {
                    shared.metrics.record_hit();
                    shared.sweep(&mut state, now);
                    return Ok(value);
                }
                Lookup::Expired => shared.metrics.record_expirations(1),
                Lookup::Absent => {}
            }

            if let Some(flight) = state.inflight.get(key) {
                shared.metrics.record_hit();
                flight.subscribe()
            } else {
                shared.metrics.record_miss();
                let promise: Promise<LoadResult<V>> = Promise::new();
                let waiter = promise.subscribe();
                state.inflight.insert(key.clone(), promise.clone());

                let loader_id = loader.id();
                if !state.buckets.contains_key(&loader_id) {
                    state.bucket_seq += 1;
                    let generation = state.bucket_seq;
                    let timer = self.spawn_flush_timer(loader.clone(), generation);
                    state.buckets.insert(
                        loader_id,
                        Bucket {
                            generation,
                            pending: Vec::new(),
                            timer,
                        },
                    );
                }
                let Some(bucket) = state.buckets.get_mut(&loader_id) else {
                    unreachable!("bucket inserted above");
                };
                bucket.pending.push(Enrolment {
                    key: key.clone(),
                    ttl,
                    promise,
                });

                if bucket.pending.len() >= shared.config.max_batch_size {
                    let Some(bucket) = state.buckets.remove(&loader_id) else {
                        unreachable!("bucket present above");
                    };
                    // cap reached: cancel the delayed flush and run now
                    bucket.timer.abort();
                    drop(state);

                    let flush_shared = Arc::clone(shared);
                    let flush_loader = loader.clone();
                    tokio::spawn(async move {
                        flush_shared.run_flush(&flush_loader, bucket.pending).await;
                    });
                }
                waiter
            }
        };

        match waiter.wait().await {
            Some(result) => result,
            None => Err(CacheError::LoadAbandoned),
        }
    }

    /// Preloads absent keys, sequentially, storing each result with the
    /// default TTL.
    ///
    /// Loads go through single-flight, so a concurrent `get_with` for the
    /// same key joins the warmup load. Failures are collected per key and
    /// do not abort the remaining entries.
    pub async fn warmup<I, F, Fut>(&self, entries: I) -> WarmupReport<K>
    where
        I: IntoIterator<Item = (K, F)>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let mut report = WarmupReport {
            loaded: 0,
            skipped: 0,
            errors: Vec::new(),
        };
        for (key, loader) in entries {
            if self.contains(&key) {
                report.skipped += 1;
                continue;
            }
            match self.get_with(&key, loader).await {
                Ok(_) => report.loaded += 1,
                Err(err) => report.errors.push((key, err)),
            }
        }
        report
    }

    fn spawn_flush_timer(&self, loader: BatchLoader<K, V>, generation: u64) -> JoinHandle<()> {
        let shared = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.batch_window).await;
            let pending = {
                let mut state = shared.state.lock();
                let armed = matches!(
                    state.buckets.get(&loader.id()),
                    Some(bucket) if bucket.generation == generation
                );
                if !armed {
                    // this bucket was already flushed by the size trigger
                    return;
                }
                match state.buckets.remove(&loader.id()) {
                    Some(bucket) => bucket.pending,
                    None => return,
                }
            };
            shared.run_flush(&loader, pending).await;
        })
    }
}

/// Aggregate outcome of a [`Cache::warmup`] pass.
#[derive(Debug)]
pub struct WarmupReport<K> {
    /// Keys loaded and stored by this pass.
    pub loaded: usize,
    /// Keys skipped because a fresh entry already existed.
    pub skipped: usize,
    /// Keys whose loader failed, with the failure.
    pub errors: Vec<(K, CacheError)>,
}

impl<K> WarmupReport<K> {
    /// Returns `true` if every attempted load succeeded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CacheBuilder;
    use crate::clock::ManualClock;

    fn small_cache(maxsize: usize) -> Cache<&'static str, i32> {
        CacheBuilder::new().maxsize(maxsize).build().unwrap()
    }

    #[test]
    fn set_get_delete_roundtrip() {
        let cache = small_cache(8);

        cache.set("a", 1);
        assert_eq!(cache.get(&"a").map(|v| *v), Some(1));
        assert!(cache.delete(&"a"));
        assert!(!cache.delete(&"a"));
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn set_overwrites_in_place() {
        let cache = small_cache(8);

        cache.set("a", 1);
        cache.set("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a").map(|v| *v), Some(2));
    }

    #[test]
    fn clear_drops_entries_but_not_counters() {
        let cache = small_cache(8);

        cache.set("a", 1);
        cache.get(&"a");
        cache.clear();

        assert!(cache.is_empty());
        let snapshot = cache.metrics();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.size, 0);
    }

    #[test]
    fn zero_ttl_set_stores_nothing() {
        let cache = small_cache(8);

        cache.set_ttl("a", 1, Ttl::After(Duration::ZERO));
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn expired_entry_counts_as_expiration_and_miss() {
        let clock = ManualClock::new();
        let cache: Cache<&str, i32> = CacheBuilder::new()
            .default_ttl(Duration::from_secs(1))
            .clock(clock.clone())
            .build()
            .unwrap();

        cache.set("k", 5);
        clock.advance(Duration::from_secs(2));

        assert!(cache.get(&"k").is_none());
        let snapshot = cache.metrics();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.expirations, 1);
        assert_eq!(snapshot.size, 0);
    }
}
