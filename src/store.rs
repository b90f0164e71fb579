//! # LRU + TTL Entry Index
//!
//! The key→entry index behind [`Cache`](crate::cache::Cache): a hash index
//! over a doubly-linked recency list, with per-entry expiry checked on every
//! lookup.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                         TtlLru<K, V>                             │
//!   │                                                                  │
//!   │   ┌────────────────────────────────────────────────────────────┐ │
//!   │   │  FxHashMap<K, NonNull<Node>>                               │ │
//!   │   │                                                            │ │
//!   │   │  ┌─────────┬──────────────────────────────────────────┐    │ │
//!   │   │  │   Key   │  node ptr                                │    │ │
//!   │   │  ├─────────┼──────────────────────────────────────────┤    │ │
//!   │   │  │  "a"    │  ────────────────────────────────────┐   │    │ │
//!   │   │  │  "b"    │  ─────────────────────────────┐      │   │    │ │
//!   │   │  └─────────┴───────────────────────────────┼──────┼───┘    │ │
//!   │   └──────────────────────────────────────────── ┼──────┼───────┘ │
//!   │                                                 ▼      ▼         │
//!   │   head ──► ┌────────────┐ ◄──────► ┌────────────┐ ◄── tail      │
//!   │     (MRU)  │ key, value │          │ key, value │   (LRU)       │
//!   │            │ expires_at │          │ expires_at │               │
//!   │            └────────────┘          └────────────┘               │
//!   │                                                                  │
//!   │   Most Recently Used ───────────────────► Least Recently Used    │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Method            | Complexity | Description                              |
//! |-------------------|------------|------------------------------------------|
//! | `lookup(&k, now)` | O(1)       | Hit → move to MRU; expired → drop entry  |
//! | `contains(&k)`    | O(1)       | Existence check, no reordering           |
//! | `insert(k, v, …)` | O(1)       | Insert or overwrite, moves to MRU        |
//! | `remove(&k)`      | O(1)       | Remove entry by key                      |
//! | `pop_lru()`       | O(1)       | Remove and return least recently used    |
//! | `evict_excess()`  | O(evicted) | Pop LRU until within `maxsize`           |
//! | `sweep_expired()` | O(limit)   | Bounded expired-entry scan from LRU end  |
//!
//! ## Expiry Model
//!
//! Expiry metadata lives on the entry itself; there is no timer wheel and no
//! background reaper. Two mechanisms bound expired residency:
//!
//! - **Lazy**: `lookup` at time `t` treats `expires_at ≤ t` as absent and
//!   drops the entry on the spot.
//! - **Opportunistic sweep**: the facade calls `sweep_expired` after its
//!   primary operation, scanning a bounded number of nodes from the LRU end.
//!
//! ## Invariants
//!
//! - A key is present in the hash index iff its node is linked into the
//!   recency list; `validate_invariants` checks this in debug builds.
//! - `expires_at`, when set, is strictly after `inserted_at`.
//!
//! ## Safety
//!
//! Nodes are heap-allocated and tracked via `NonNull` pointers owned by the
//! struct; the map is the single source of node ownership and `Drop` frees
//! every node by draining the list. No pointer escapes the module.

use std::hash::Hash;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;

/// Stored entry payload with its retention metadata.
struct Entry<V> {
    value: Arc<V>,
    #[allow(dead_code)]
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

/// Node in the recency list.
///
/// Layout keeps the link pointers first; the key is needed for map removal
/// during eviction.
#[repr(C)]
struct Node<K, V> {
    prev: Option<NonNull<Node<K, V>>>,
    next: Option<NonNull<Node<K, V>>>,
    key: K,
    entry: Entry<V>,
}

/// Outcome of a [`TtlLru::lookup`].
#[derive(Debug)]
pub enum Lookup<V> {
    /// Fresh entry; it has been moved to the MRU position.
    Hit(Arc<V>),
    /// The entry's deadline had passed; it has been removed.
    Expired,
    /// No entry for the key.
    Absent,
}

/// Capacity- and time-bounded LRU index.
///
/// Single-threaded core: thread safety is provided by the facade's lock.
/// Values are held as `Arc<V>` so lookups hand out shared references without
/// cloning the payload.
pub struct TtlLru<K, V>
where
    K: Eq + Hash + Clone,
{
    map: FxHashMap<K, NonNull<Node<K, V>>>,
    head: Option<NonNull<Node<K, V>>>,
    tail: Option<NonNull<Node<K, V>>>,
    maxsize: Option<usize>,
}

// SAFETY: the raw pointers only reference heap nodes owned by the struct,
// so the container is Send/Sync exactly when its key and value types are.
unsafe impl<K, V> Send for TtlLru<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send + Sync,
{
}

unsafe impl<K, V> Sync for TtlLru<K, V>
where
    K: Eq + Hash + Clone + Sync,
    V: Send + Sync,
{
}

impl<K, V> TtlLru<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an index bounded to `maxsize` entries; `None` disables the
    /// capacity check entirely.
    pub fn new(maxsize: Option<usize>) -> Self {
        TtlLru {
            map: FxHashMap::with_capacity_and_hasher(
                maxsize.unwrap_or(0),
                Default::default(),
            ),
            head: None,
            tail: None,
            maxsize,
        }
    }

    /// Detach a node from the linked list without removing it from the map.
    #[inline(always)]
    fn detach(&mut self, node_ptr: NonNull<Node<K, V>>) {
        unsafe {
            let node = node_ptr.as_ref();
            let prev = node.prev;
            let next = node.next;

            match prev {
                Some(mut p) => p.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut n) => n.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }
    }

    /// Attach a node at the front (MRU position).
    #[inline(always)]
    fn attach_front(&mut self, mut node_ptr: NonNull<Node<K, V>>) {
        unsafe {
            let node = node_ptr.as_mut();
            node.prev = None;
            node.next = self.head;

            match self.head {
                Some(mut h) => h.as_mut().prev = Some(node_ptr),
                None => self.tail = Some(node_ptr),
            }

            self.head = Some(node_ptr);
        }
    }

    /// Pop the tail node (LRU) and return it.
    #[inline(always)]
    fn pop_tail(&mut self) -> Option<Box<Node<K, V>>> {
        self.tail.map(|tail_ptr| unsafe {
            let node = Box::from_raw(tail_ptr.as_ptr());

            self.tail = node.prev;
            match self.tail {
                Some(mut t) => t.as_mut().next = None,
                None => self.head = None,
            }

            node
        })
    }

    /// Unlink one node and free it, returning its value.
    fn remove_node(&mut self, node_ptr: NonNull<Node<K, V>>) -> Arc<V> {
        self.detach(node_ptr);
        let node = unsafe { Box::from_raw(node_ptr.as_ptr()) };
        self.map.remove(&node.key);
        node.entry.value
    }

    /// Looks up `key` at time `now`.
    ///
    /// A fresh entry is moved to the MRU position. An entry whose deadline
    /// has passed is dropped and reported as [`Lookup::Expired`], so callers
    /// can account the removal separately from a plain miss.
    pub fn lookup(&mut self, key: &K, now: Instant) -> Lookup<V> {
        let node_ptr = match self.map.get(key) {
            Some(&ptr) => ptr,
            None => return Lookup::Absent,
        };

        if unsafe { node_ptr.as_ref() }.entry.is_expired(now) {
            self.remove_node(node_ptr);

            #[cfg(debug_assertions)]
            self.validate_invariants();

            return Lookup::Expired;
        }

        self.detach(node_ptr);
        self.attach_front(node_ptr);

        #[cfg(debug_assertions)]
        self.validate_invariants();

        Lookup::Hit(Arc::clone(unsafe { &node_ptr.as_ref().entry.value }))
    }

    /// Returns `true` if a fresh entry exists for `key`.
    ///
    /// Does not reorder the list and does not drop expired entries.
    pub fn contains(&self, key: &K, now: Instant) -> bool {
        match self.map.get(key) {
            Some(&ptr) => !unsafe { ptr.as_ref() }.entry.is_expired(now),
            None => false,
        }
    }

    /// Inserts or overwrites `key`, moving it to the MRU position.
    ///
    /// Returns the previous value if the key existed. The caller enforces
    /// capacity afterwards via [`evict_excess`](TtlLru::evict_excess).
    pub fn insert(
        &mut self,
        key: K,
        value: Arc<V>,
        now: Instant,
        expires_at: Option<Instant>,
    ) -> Option<Arc<V>> {
        debug_assert!(expires_at.map_or(true, |deadline| deadline > now));

        if let Some(&node_ptr) = self.map.get(&key) {
            let previous = unsafe {
                let node = &mut *node_ptr.as_ptr();
                std::mem::replace(
                    &mut node.entry,
                    Entry {
                        value,
                        inserted_at: now,
                        expires_at,
                    },
                )
            };

            self.detach(node_ptr);
            self.attach_front(node_ptr);

            #[cfg(debug_assertions)]
            self.validate_invariants();

            return Some(previous.value);
        }

        let node = Box::new(Node {
            prev: None,
            next: None,
            key: key.clone(),
            entry: Entry {
                value,
                inserted_at: now,
                expires_at,
            },
        });
        let node_ptr = match NonNull::new(Box::into_raw(node)) {
            Some(ptr) => ptr,
            // Box::into_raw never yields null
            None => unreachable!("fresh allocation was null"),
        };

        self.map.insert(key, node_ptr);
        self.attach_front(node_ptr);

        #[cfg(debug_assertions)]
        self.validate_invariants();

        None
    }

    /// Removes an entry by key, returning its value if present.
    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let node_ptr = self.map.remove(key)?;

        self.detach(node_ptr);
        let node = unsafe { Box::from_raw(node_ptr.as_ptr()) };

        #[cfg(debug_assertions)]
        self.validate_invariants();

        Some(node.entry.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, Arc<V>)> {
        let node = self.pop_tail()?;
        self.map.remove(&node.key);

        #[cfg(debug_assertions)]
        self.validate_invariants();

        Some((node.key, node.entry.value))
    }

    /// Pops LRU entries until the index is back within `maxsize`.
    ///
    /// Returns the number of entries dropped. A `maxsize` of zero keeps the
    /// index permanently empty: inserts land and are immediately evicted.
    pub fn evict_excess(&mut self) -> usize {
        let maxsize = match self.maxsize {
            Some(maxsize) => maxsize,
            None => return 0,
        };

        let mut evicted = 0;
        while self.map.len() > maxsize {
            match self.pop_lru() {
                Some(_) => evicted += 1,
                None => panic!("capacity overflow with an empty recency list"),
            }
        }
        evicted
    }

    /// Scans up to `limit` nodes from the LRU end and drops the expired ones.
    ///
    /// Returns the number of entries dropped. Bounded so the cost piggybacks
    /// on a foreground operation without a latency cliff.
    pub fn sweep_expired(&mut self, now: Instant, limit: usize) -> usize {
        let mut removed = 0;
        let mut cursor = self.tail;

        for _ in 0..limit {
            let node_ptr = match cursor {
                Some(ptr) => ptr,
                None => break,
            };
            cursor = unsafe { node_ptr.as_ref() }.prev;

            if unsafe { node_ptr.as_ref() }.entry.is_expired(now) {
                self.remove_node(node_ptr);
                removed += 1;
            }
        }

        #[cfg(debug_assertions)]
        self.validate_invariants();

        removed
    }

    /// Current number of entries (expired-but-unswept included).
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The configured capacity; `None` means unbounded.
    #[inline]
    pub fn maxsize(&self) -> Option<usize> {
        self.maxsize
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        while self.pop_tail().is_some() {}
        self.map.clear();

        #[cfg(debug_assertions)]
        self.validate_invariants();
    }

    /// Keys in recency order, MRU first. For diagnostics and tests.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut current = self.head;
        while let Some(ptr) = current {
            unsafe {
                keys.push(ptr.as_ref().key.clone());
                current = ptr.as_ref().next;
            }
        }
        keys
    }

    /// Validate internal invariants (debug builds only).
    fn validate_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            if self.map.is_empty() {
                debug_assert!(self.head.is_none());
                debug_assert!(self.tail.is_none());
                return;
            }

            let mut count = 0usize;
            let mut current = self.head;
            while let Some(ptr) = current {
                count += 1;
                unsafe {
                    let node = ptr.as_ref();
                    debug_assert!(self.map.contains_key(&node.key));
                    current = node.next;
                }
                if count > self.map.len() {
                    panic!("cycle detected in recency list");
                }
            }

            debug_assert_eq!(count, self.map.len());
        }
    }
}

impl<K, V> Drop for TtlLru<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        while self.pop_tail().is_some() {}
    }
}

impl<K, V> std::fmt::Debug for TtlLru<K, V>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlLru")
            .field("len", &self.len())
            .field("maxsize", &self.maxsize)
            .finish_non_exhaustive()
    }
}
