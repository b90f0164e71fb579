//! Memoization wrappers over async functions.
//!
//! The function-decorator form of the cache: wrap an async function once and
//! every call site gets transparent caching, keyed by a stable digest of the
//! call arguments. Each wrapper owns one private [`Cache`] keyed by
//! [`CacheKey`].
//!
//! Two flavours, mirroring the two retention policies:
//!
//! - [`LruMemo`]: capacity-bounded, entries never expire.
//! - [`TtlMemo`]: per-entry time-to-live, optional capacity bound, and a
//!   `skip_args` count to drop leading positional arguments (a receiver,
//!   typically) from the key.
//!
//! Both expose [`call`](TtlMemo::call) (the cached path),
//! [`refresh`](TtlMemo::refresh) (bypass the hit path and reload),
//! [`invalidate`](TtlMemo::invalidate), [`clear`](TtlMemo::clear) and
//! [`metrics`](TtlMemo::metrics).
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use flightcache::memo::TtlMemo;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let user_name = TtlMemo::new(
//!     |(user_id,): (u64,)| async move {
//!         // expensive lookup elided
//!         Ok(format!("user-{user_id}"))
//!     },
//!     Some(Duration::from_secs(60)),
//!     Some(1024),
//!     0,
//! )?;
//!
//! let name = user_name.call((7,)).await?;
//! assert_eq!(name.as_str(), "user-7");
//! # Ok(()) }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::CacheBuilder;
use crate::cache::Cache;
use crate::error::{CacheError, ConfigError};
use crate::key::{CacheKey, KeyArgs};
use crate::metrics::MetricsSnapshot;

/// TTL-expiring memoization wrapper around an async function.
pub struct TtlMemo<Args, V, F, Fut> {
    cache: Cache<CacheKey, V>,
    func: F,
    skip_args: usize,
    _marker: PhantomData<fn(Args) -> Fut>,
}

impl<Args, V, F, Fut> TtlMemo<Args, V, F, Fut>
where
    Args: KeyArgs,
    V: Send + Sync + 'static,
    F: Fn(Args) -> Fut,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    /// Wraps `func`.
    ///
    /// `time_to_live` of `None` never expires entries, and a zero
    /// `time_to_live` caches nothing (the function runs on every call);
    /// `maxsize` of `None` disables eviction; `skip_args` drops that many
    /// leading positional arguments from the derived key.
    pub fn new(
        func: F,
        time_to_live: Option<Duration>,
        maxsize: Option<usize>,
        skip_args: usize,
    ) -> Result<Self, ConfigError> {
        let mut builder = CacheBuilder::new();
        builder = match maxsize {
            Some(maxsize) => builder.maxsize(maxsize),
            None => builder.unlimited(),
        };
        if let Some(ttl) = time_to_live {
            builder = builder.default_ttl(ttl);
        }
        Ok(TtlMemo {
            cache: builder.build()?,
            func,
            skip_args,
            _marker: PhantomData,
        })
    }

    /// Calls through the cache: a fresh entry is returned directly,
    /// otherwise the wrapped function runs (single-flighted per key).
    pub async fn call(&self, args: Args) -> Result<Arc<V>, CacheError> {
        let key = args.cache_key_with_skip(self.skip_args);
        self.cache.get_with(&key, || (self.func)(args)).await
    }

    /// Bypasses the hit path: drops the entry and reloads.
    ///
    /// The reload goes through single-flight, so concurrent cached callers
    /// for the same arguments coalesce onto this load instead of observing
    /// the stale entry.
    pub async fn refresh(&self, args: Args) -> Result<Arc<V>, CacheError> {
        let key = args.cache_key_with_skip(self.skip_args);
        self.cache.delete(&key);
        self.cache.get_with(&key, || (self.func)(args)).await
    }

    /// Drops the entry for one argument list. Returns `true` if one existed.
    pub fn invalidate(&self, args: &Args) -> bool {
        self.cache.delete(&args.cache_key_with_skip(self.skip_args))
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Counter snapshot of the wrapper's private cache.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.cache.metrics()
    }
}

/// Capacity-bounded memoization wrapper; entries never expire.
pub struct LruMemo<Args, V, F, Fut> {
    inner: TtlMemo<Args, V, F, Fut>,
}

impl<Args, V, F, Fut> LruMemo<Args, V, F, Fut>
where
    Args: KeyArgs,
    V: Send + Sync + 'static,
    F: Fn(Args) -> Fut,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    /// Wraps `func` with a capacity bound; `None` disables eviction.
    pub fn new(func: F, maxsize: Option<usize>) -> Result<Self, ConfigError> {
        Ok(LruMemo {
            inner: TtlMemo::new(func, None, maxsize, 0)?,
        })
    }

    /// See [`TtlMemo::call`].
    pub async fn call(&self, args: Args) -> Result<Arc<V>, CacheError> {
        self.inner.call(args).await
    }

    /// See [`TtlMemo::refresh`].
    pub async fn refresh(&self, args: Args) -> Result<Arc<V>, CacheError> {
        self.inner.refresh(args).await
    }

    /// See [`TtlMemo::invalidate`].
    pub fn invalidate(&self, args: &Args) -> bool {
        self.inner.invalidate(args)
    }

    /// See [`TtlMemo::clear`].
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// See [`TtlMemo::metrics`].
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Counted = Arc<AtomicUsize>;

    fn counted_formatter(
        calls: &Counted,
    ) -> impl Fn((String, u32)) -> futures::future::BoxFuture<'static, anyhow::Result<String>> {
        let calls = Arc::clone(calls);
        move |(name, n): (String, u32)| {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{name}-{n}"))
            })
        }
    }

    #[tokio::test]
    async fn call_caches_per_argument_list() {
        let calls: Counted = Arc::default();
        let memo = LruMemo::new(counted_formatter(&calls), Some(128)).unwrap();

        let first = memo.call(("a".to_string(), 1)).await.unwrap();
        let second = memo.call(("a".to_string(), 1)).await.unwrap();
        assert_eq!(first.as_str(), "a-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        memo.call(("a".to_string(), 2)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let calls: Counted = Arc::default();
        let memo = LruMemo::new(counted_formatter(&calls), Some(128)).unwrap();

        memo.call(("a".to_string(), 1)).await.unwrap();
        assert!(memo.invalidate(&("a".to_string(), 1)));
        assert!(!memo.invalidate(&("a".to_string(), 1)));

        memo.call(("a".to_string(), 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_bypasses_the_hit_path() {
        let calls: Counted = Arc::default();
        let memo = LruMemo::new(counted_formatter(&calls), Some(128)).unwrap();

        memo.call(("a".to_string(), 1)).await.unwrap();
        memo.refresh(("a".to_string(), 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // refresh leaves a cached entry behind
        memo.call(("a".to_string(), 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_args_shares_entries_across_receivers() {
        let calls: Counted = Arc::default();
        let memo = TtlMemo::new(
            counted_formatter(&calls),
            None,
            Some(128),
            1,
        )
        .unwrap();

        memo.call(("receiver_a".to_string(), 1)).await.unwrap();
        memo.call(("receiver_b".to_string(), 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        memo.call(("receiver_a".to_string(), 2)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_and_metrics_pass_through() {
        let calls: Counted = Arc::default();
        let memo = LruMemo::new(counted_formatter(&calls), Some(128)).unwrap();

        memo.call(("a".to_string(), 1)).await.unwrap();
        memo.call(("a".to_string(), 1)).await.unwrap();

        let snapshot = memo.metrics();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.size, 1);

        memo.clear();
        assert_eq!(memo.metrics().size, 0);

        memo.call(("a".to_string(), 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_memo_loads_every_call_and_stores_nothing() {
        let calls: Counted = Arc::default();
        let memo = TtlMemo::new(
            counted_formatter(&calls),
            Some(Duration::ZERO),
            Some(128),
            0,
        )
        .unwrap();

        let first = memo.call(("a".to_string(), 1)).await.unwrap();
        let second = memo.call(("a".to_string(), 1)).await.unwrap();
        assert_eq!(first.as_str(), "a-1");
        assert_eq!(second.as_str(), "a-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.metrics().size, 0);
    }
}
