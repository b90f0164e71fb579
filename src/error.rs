//! Error types for the flightcache library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Returned from the loading paths (`get_with`,
//!   `get_batched`, `warmup`). Cloneable so a single failure can fan out to
//!   every waiter coalesced onto the same load.
//! - [`ConfigError`]: Returned when cache configuration parameters are
//!   invalid (e.g. a zero batch size).
//!
//! Loader failures are never cached: an entry is only stored for successful
//! loads, and the next lookup after a failure starts a fresh load.

use std::sync::Arc;

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Error surfaced by the cache loading paths.
///
/// The wrapped causes are reference-counted: every waiter attached to a
/// failed load receives a clone of the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The unary loader failed. Delivered to every waiter on the slot.
    #[error("load failed: {0}")]
    Load(Arc<anyhow::Error>),

    /// The batch loader itself failed. Delivered to every waiter in the
    /// flushed batch.
    #[error("batch load failed: {0}")]
    Batch(Arc<anyhow::Error>),

    /// The batch loader returned an ordered sequence whose length does not
    /// match the requested key list. Treated as a batch-wide failure.
    #[error("batch loader returned {got} values for {expected} keys")]
    BatchShape { expected: usize, got: usize },

    /// The batch completed but its result mapping contained no value for
    /// this key. Delivered only to that key's waiters.
    #[error("batch result contained no value for this key")]
    KeyAbsentInBatch,

    /// The load task stopped without reporting a result. This indicates the
    /// loader future panicked; the failure is not cached and the next lookup
    /// starts a fresh load.
    #[error("load task stopped before reporting a result")]
    LoadAbandoned,
}

impl CacheError {
    /// Wraps a unary loader failure.
    pub(crate) fn load(err: anyhow::Error) -> Self {
        CacheError::Load(Arc::new(err))
    }

    /// Wraps a batch loader failure.
    pub(crate) fn batch(err: anyhow::Error) -> Self {
        CacheError::Batch(Arc::new(err))
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`CacheBuilder::build`](crate::builder::CacheBuilder::build)
/// and the memo constructors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_batch_size` was zero; a batch must be able to hold at least one
    /// pending key.
    #[error("max_batch_size must be at least 1")]
    ZeroBatchSize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- CacheError -------------------------------------------------------

    #[test]
    fn load_display_includes_cause() {
        let err = CacheError::load(anyhow::anyhow!("connection refused"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn batch_shape_display_shows_counts() {
        let err = CacheError::BatchShape {
            expected: 3,
            got: 2,
        };
        assert_eq!(err.to_string(), "batch loader returned 2 values for 3 keys");
    }

    #[test]
    fn clones_share_the_cause() {
        let err = CacheError::load(anyhow::anyhow!("boom"));
        let other = err.clone();
        match (&err, &other) {
            (CacheError::Load(a), CacheError::Load(b)) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("clone changed the variant"),
        }
    }

    #[test]
    fn cache_error_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<CacheError>();
    }

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_names_the_parameter() {
        assert!(ConfigError::ZeroBatchSize
            .to_string()
            .contains("max_batch_size"));
    }

    #[test]
    fn config_clone_and_eq() {
        let a = ConfigError::ZeroBatchSize;
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }
}
