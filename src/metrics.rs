//! Cache hit/miss/load accounting.
//!
//! Counters are monotonic and atomic so they can be bumped from any path
//! holding a shared handle to the cache, including spawned load drivers.
//! There is no reset operation; tests construct a fresh cache (and with it a
//! fresh [`CacheMetrics`]) instead.
//!
//! ## Counter Semantics
//!
//! | Counter       | Incremented when                                        |
//! |---------------|---------------------------------------------------------|
//! | `hits`        | A lookup is served from the store, or a caller joins an |
//! |               | in-flight load started by another caller                |
//! | `misses`      | A lookup finds nothing and either returns absent or     |
//! |               | becomes the leader of a new load                        |
//! | `evictions`   | An entry is dropped to enforce `maxsize`                |
//! | `expirations` | An expired entry is dropped (lazy lookup or sweep)      |
//! | `loads`       | A unary loader is invoked                               |
//! | `batch_calls` | A batch loader is invoked (once per flush)              |
//! | `batch_keys`  | Keys carried by those flushes, summed                   |

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter set owned by a cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    loads: AtomicU64,
    batch_calls: AtomicU64,
    batch_keys: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, n: u64) {
        self.expirations.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch_call(&self, keys: usize) {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        self.batch_keys.fetch_add(keys as u64, Ordering::Relaxed);
    }

    /// Captures the counters along with the size gauges supplied by the
    /// caller (the facade reads them under its state lock, so a snapshot is
    /// internally consistent).
    pub(crate) fn snapshot(&self, size: usize, capacity: Option<usize>) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            batch_calls: self.batch_calls.load(Ordering::Relaxed),
            batch_keys: self.batch_keys.load(Ordering::Relaxed),
            size,
            capacity,
        }
    }
}

/// Point-in-time view of a cache's counters.
///
/// Obtained from [`Cache::metrics`](crate::cache::Cache::metrics).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub loads: u64,
    pub batch_calls: u64,
    pub batch_keys: u64,

    // gauges captured at snapshot time
    pub size: usize,
    pub capacity: Option<usize>,
}

impl MetricsSnapshot {
    /// Fraction of lookups served from cache: `hits / (hits + misses)`.
    ///
    /// Returns `0.0` when no lookups have been recorded.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_zero() {
        let metrics = CacheMetrics::default();
        let snap = metrics.snapshot(0, Some(128));
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.hit_rate(), 0.0);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = CacheMetrics::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_load();
        metrics.record_evictions(2);
        metrics.record_expirations(1);

        let snap = metrics.snapshot(3, None);
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.loads, 1);
        assert_eq!(snap.evictions, 2);
        assert_eq!(snap.expirations, 1);
        assert_eq!(snap.size, 3);
        assert_eq!(snap.capacity, None);
    }

    #[test]
    fn hit_rate_is_hits_over_total() {
        let metrics = CacheMetrics::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        let snap = metrics.snapshot(0, None);
        assert!((snap.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn batch_call_tracks_both_counters() {
        let metrics = CacheMetrics::default();
        metrics.record_batch_call(50);
        metrics.record_batch_call(10);
        let snap = metrics.snapshot(0, None);
        assert_eq!(snap.batch_calls, 2);
        assert_eq!(snap.batch_keys, 60);
    }
}
