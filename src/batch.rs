//! Batch loaders for cross-key miss coalescing.
//!
//! When several distinct keys miss inside one coalescing window and share a
//! loader, the cache issues a single batch call instead of N unary calls
//! (the DataLoader pattern). Buckets are keyed by *loader identity*, so the
//! loader is a value with identity — a [`BatchLoader`] handle — rather than
//! a bare closure: clones of one handle coalesce together, two handles built
//! from the same function do not.
//!
//! ## Result Contract
//!
//! A batch loader receives the batch's keys in enrolment order and returns a
//! [`BatchOutcome`]:
//!
//! - [`BatchOutcome::Map`]: values keyed per request; a missing key fails
//!   only that key's waiters, extra keys are ignored.
//! - [`BatchOutcome::Values`]: values aligned positionally with the
//!   requested keys; a length mismatch fails the whole batch.
//!
//! A returned error fails every waiter in the flushed batch.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

/// Result of one batch invocation.
#[derive(Debug)]
pub enum BatchOutcome<K, V> {
    /// `key → value` for each resolved key.
    Map(HashMap<K, V>),
    /// Values aligned positionally with the requested key list.
    Values(Vec<V>),
}

impl<K, V> From<HashMap<K, V>> for BatchOutcome<K, V> {
    fn from(map: HashMap<K, V>) -> Self {
        BatchOutcome::Map(map)
    }
}

impl<K, V> From<Vec<V>> for BatchOutcome<K, V> {
    fn from(values: Vec<V>) -> Self {
        BatchOutcome::Values(values)
    }
}

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// An identity-bearing handle around a batch load function.
///
/// Cheap to clone; all clones share one identity and therefore one pending
/// bucket per cache.
///
/// # Example
///
/// ```
/// use flightcache::batch::{BatchLoader, BatchOutcome};
///
/// let by_id: BatchLoader<u64, String> = BatchLoader::new(|ids: Vec<u64>| async move {
///     let values = ids.iter().map(|id| format!("row-{id}")).collect::<Vec<_>>();
///     Ok(BatchOutcome::from(values))
/// });
/// # let _ = by_id.clone();
/// ```
pub struct BatchLoader<K, V> {
    id: u64,
    run: Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, anyhow::Result<BatchOutcome<K, V>>> + Send + Sync>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        BatchLoader {
            id: self.id,
            run: Arc::clone(&self.run),
        }
    }
}

impl<K, V> fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoader").field("id", &self.id).finish()
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Wraps a batch function, assigning it a fresh process-unique identity.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<BatchOutcome<K, V>>> + Send + 'static,
    {
        BatchLoader {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            run: Arc::new(move |keys| Box::pin(f(keys))),
        }
    }

    /// The bucket identity this loader coalesces under.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Invokes the underlying batch function.
    pub(crate) fn run(
        &self,
        keys: Vec<K>,
    ) -> BoxFuture<'static, anyhow::Result<BatchOutcome<K, V>>> {
        (self.run)(keys)
    }
}
