//! Cache construction and configuration validation.
//!
//! ## Parameters
//!
//! | Parameter        | Default   | Meaning                                   |
//! |------------------|-----------|-------------------------------------------|
//! | `maxsize`        | 128       | Max entries; [`unlimited`](CacheBuilder::unlimited) disables eviction |
//! | `default_ttl`    | none      | Entry lifetime; absent means never expire |
//! | `batch_window`   | 5 ms      | Coalescing window for batch loads         |
//! | `max_batch_size` | 100       | Hard cap per batch; reaching it flushes   |
//! | `clock`          | monotonic | Time source (swap for a manual clock in tests) |
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use flightcache::builder::CacheBuilder;
//! use flightcache::cache::Cache;
//!
//! let cache: Cache<String, Vec<u8>> = CacheBuilder::new()
//!     .maxsize(1024)
//!     .default_ttl(Duration::from_secs(60))
//!     .build()
//!     .expect("valid configuration");
//! assert_eq!(cache.capacity(), Some(1024));
//! ```

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, Config};
use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigError;

/// Builder for [`Cache`] instances.
#[derive(Clone)]
pub struct CacheBuilder {
    maxsize: Option<usize>,
    default_ttl: Option<Duration>,
    batch_window: Duration,
    max_batch_size: usize,
    clock: Arc<dyn Clock>,
}

impl CacheBuilder {
    /// Starts from the defaults listed in the module documentation.
    pub fn new() -> Self {
        CacheBuilder {
            maxsize: Some(128),
            default_ttl: None,
            batch_window: Duration::from_millis(5),
            max_batch_size: 100,
            clock: Arc::new(MonotonicClock),
        }
    }

    /// Bounds the cache to `maxsize` entries.
    ///
    /// Inserting past the bound evicts from the LRU end. A bound of zero is
    /// accepted and keeps the cache permanently empty.
    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.maxsize = Some(maxsize);
        self
    }

    /// Disables the capacity bound entirely.
    pub fn unlimited(mut self) -> Self {
        self.maxsize = None;
        self
    }

    /// Sets the default time-to-live applied where a call does not override
    /// it. Without a default, entries never expire. A zero default means
    /// "do not store": loaders still run and their values are returned, but
    /// no entries are created.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Sets the batch coalescing window.
    ///
    /// A zero window still batches: the flush runs on the next cooperative
    /// yield, grouping everything enqueued synchronously before it.
    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Sets the hard cap on keys per batch invocation. Reaching the cap
    /// flushes immediately instead of waiting out the window.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Replaces the time source. Tests pair this with
    /// [`ManualClock`](crate::clock::ManualClock) to drive expiry by hand.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validates the configuration and builds the cache.
    pub fn build<K, V>(self) -> Result<Cache<K, V>, ConfigError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        Ok(Cache::from_parts(
            Config {
                maxsize: self.maxsize,
                default_ttl: self.default_ttl,
                batch_window: self.batch_window,
                max_batch_size: self.max_batch_size,
            },
            self.clock,
        ))
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("maxsize", &self.maxsize)
            .field("default_ttl", &self.default_ttl)
            .field("batch_window", &self.batch_window)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}
