//! Shared completable promises for in-flight loads.
//!
//! Every key with a load in progress owns one [`Promise`]; concurrent
//! lookups for that key attach as [`Waiter`]s instead of starting their own
//! load. The per-key lifecycle:
//!
//! ```text
//! Absent ──miss──► Loading ──fulfil(Ok)───► Present
//!                     │
//!                     └──fulfil(Err)──► Absent (error fanned out to waiters)
//! ```
//!
//! Built on `tokio::sync::watch` for two properties the cache relies on:
//!
//! - A waiter can never miss a completion: `wait` inspects the current slot
//!   value before parking, so attaching after fulfilment resolves
//!   immediately.
//! - Dropping a waiter detaches only that waiter. The load is driven by a
//!   spawned task holding its own [`Promise`] clone, so a cancelled caller
//!   never cancels the shared load.

use std::sync::Arc;

use tokio::sync::watch;

/// Completable, multi-consumer promise.
///
/// Clones share the same slot; fulfilment is sticky and first-write-wins.
pub(crate) struct Promise<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Promise<T> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Promise { tx: Arc::new(tx) }
    }

    /// Attaches a waiter. May be called before or after fulfilment.
    pub(crate) fn subscribe(&self) -> Waiter<T> {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Fulfils the promise, waking every attached waiter.
    ///
    /// A second fulfilment would overwrite the first; callers fulfil exactly
    /// once per slot.
    pub(crate) fn fulfil(&self, value: T) {
        debug_assert!(self.tx.borrow().is_none(), "promise fulfilled twice");
        self.tx.send_replace(Some(value));
    }

    /// Number of currently attached waiters. Informational only.
    #[allow(dead_code)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One caller's handle onto a [`Promise`].
pub(crate) struct Waiter<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Waiter<T> {
    /// Waits for fulfilment and returns a clone of the outcome.
    ///
    /// Returns `None` only if every [`Promise`] handle was dropped without
    /// fulfilment, which means the driving task died.
    pub(crate) async fn wait(mut self) -> Option<T> {
        match self.rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_attached_before_fulfilment() {
        let promise: Promise<i32> = Promise::new();
        let waiter = promise.subscribe();

        let handle = tokio::spawn(waiter.wait());
        promise.fulfil(7);

        assert_eq!(handle.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn waiter_attached_after_fulfilment_still_observes() {
        let promise: Promise<i32> = Promise::new();
        promise.fulfil(7);

        assert_eq!(promise.subscribe().wait().await, Some(7));
    }

    #[tokio::test]
    async fn all_waiters_see_the_same_outcome() {
        let promise: Promise<&str> = Promise::new();
        let waiters: Vec<_> = (0..16).map(|_| promise.subscribe()).collect();

        promise.fulfil("shared");

        for waiter in waiters {
            assert_eq!(waiter.wait().await, Some("shared"));
        }
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_disturb_peers() {
        let promise: Promise<i32> = Promise::new();
        let abandoned = promise.subscribe();
        let kept = promise.subscribe();

        drop(abandoned);
        promise.fulfil(1);

        assert_eq!(kept.wait().await, Some(1));
    }

    #[tokio::test]
    async fn dropped_promise_reports_abandonment() {
        let promise: Promise<i32> = Promise::new();
        let waiter = promise.subscribe();

        drop(promise);

        assert_eq!(waiter.wait().await, None);
    }

    #[tokio::test]
    async fn waiter_count_tracks_subscriptions() {
        let promise: Promise<i32> = Promise::new();
        assert_eq!(promise.waiter_count(), 0);

        let a = promise.subscribe();
        let b = promise.subscribe();
        assert_eq!(promise.waiter_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(promise.waiter_count(), 0);
    }
}
