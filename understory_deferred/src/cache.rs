// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memoizing cache of in-flight and completed asynchronous computations.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::hash::Hash;

use hashbrown::HashMap;
use smallvec::SmallVec;

type Waiter = Box<dyn FnOnce()>;

/// Stable identity of a [`CacheEntry`], unique within one cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Resolution state of a cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryState<V, E> {
    /// The computation has not settled yet.
    Pending,
    /// The computation produced a value.
    Fulfilled(V),
    /// The computation failed.
    Rejected(E),
}

impl<V, E> EntryState<V, E> {
    /// Returns `true` while the computation has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct EntryInner<V, E> {
    id: EntryId,
    state: RefCell<EntryState<V, E>>,
    waiters: RefCell<SmallVec<[Waiter; 2]>>,
}

/// Cheap-clone handle to one memoized computation.
///
/// Clones share the same underlying entry; use [`id`](Self::id) or
/// [`ptr_eq`](Self::ptr_eq) to compare identity.
pub struct CacheEntry<V, E> {
    inner: Rc<EntryInner<V, E>>,
}

impl<V, E> Clone for CacheEntry<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: fmt::Debug, E: fmt::Debug> fmt::Debug for CacheEntry<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.borrow())
            .field("waiters", &self.inner.waiters.borrow().len())
            .finish()
    }
}

impl<V, E> CacheEntry<V, E> {
    fn new(id: EntryId) -> Self {
        Self {
            inner: Rc::new(EntryInner {
                id,
                state: RefCell::new(EntryState::Pending),
                waiters: RefCell::new(SmallVec::new()),
            }),
        }
    }

    /// Identity of this entry.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.inner.id
    }

    /// Returns `true` if both handles refer to the same entry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` while the computation has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.state.borrow().is_pending()
    }

    /// Returns a snapshot of the resolution state.
    #[must_use]
    pub fn state(&self) -> EntryState<V, E>
    where
        V: Clone,
        E: Clone,
    {
        self.inner.state.borrow().clone()
    }

    /// Number of callbacks waiting for this entry to settle.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Registers `f` to run once this entry settles.
    ///
    /// If the entry has already settled, `f` runs immediately.
    pub fn on_settled(&self, f: impl FnOnce() + 'static) {
        if self.is_pending() {
            self.inner.waiters.borrow_mut().push(Box::new(f));
        } else {
            f();
        }
    }

    fn settle(&self, state: EntryState<V, E>) {
        {
            let mut current = self.inner.state.borrow_mut();
            if !current.is_pending() {
                tracing::warn!(entry = self.inner.id.0, "ignoring second settlement");
                return;
            }
            *current = state;
        }
        let waiters = core::mem::take(&mut *self.inner.waiters.borrow_mut());
        tracing::debug!(
            entry = self.inner.id.0,
            waiters = waiters.len(),
            "cache entry settled"
        );
        for waiter in waiters {
            waiter();
        }
    }
}

/// One-shot handle a computation uses to settle its cache entry.
///
/// Dropping a `Settle` without calling [`fulfill`](Self::fulfill) or
/// [`reject`](Self::reject) leaves the entry pending forever; computations
/// are not cancellable.
pub struct Settle<V, E> {
    entry: CacheEntry<V, E>,
}

impl<V, E> fmt::Debug for Settle<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settle")
            .field("entry", &self.entry.id())
            .finish()
    }
}

impl<V, E> Settle<V, E> {
    /// Identity of the entry this handle settles.
    #[must_use]
    pub fn entry_id(&self) -> EntryId {
        self.entry.id()
    }

    /// Stores `value` and wakes every waiter.
    pub fn fulfill(self, value: V) {
        self.entry.settle(EntryState::Fulfilled(value));
    }

    /// Stores `error` and wakes every waiter.
    pub fn reject(self, error: E) {
        self.entry.settle(EntryState::Rejected(error));
    }
}

/// Memoizes asynchronous computations by key.
///
/// At most one [`CacheEntry`] is ever created per key, and entries are never
/// evicted: the cache is append-only for the lifetime of the instance. The
/// cache uses interior mutability so one instance can be shared (via `Rc`)
/// between a reader, its orchestrator, and tests on a single thread.
///
/// # Example
///
/// ```
/// use understory_deferred::{AsyncResultCache, EntryState};
///
/// let cache = AsyncResultCache::<String, String, ()>::new();
///
/// let entry = cache
///     .get_or_create(&"a".to_string(), |key, settle| {
///         settle.fulfill(key.to_uppercase());
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(entry.state(), EntryState::Fulfilled("A".to_string()));
///
/// // The second lookup reuses the entry; the closure is never called.
/// let again = cache
///     .get_or_create(&"a".to_string(), |_, _| unreachable!())
///     .unwrap();
/// assert!(again.ptr_eq(&entry));
/// assert_eq!(cache.computations_started(), 1);
/// ```
pub struct AsyncResultCache<K, V, E> {
    entries: RefCell<HashMap<K, CacheEntry<V, E>>>,
    order: RefCell<Vec<K>>,
    next_id: Cell<u64>,
}

impl<K, V, E> fmt::Debug for AsyncResultCache<K, V, E>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResultCache")
            .field("keys", &*self.order.borrow())
            .finish_non_exhaustive()
    }
}

impl<K, V, E> Default for AsyncResultCache<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> AsyncResultCache<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Returns the entry for `key`, starting its computation if needed.
    ///
    /// For a key seen before, the existing entry is returned unchanged and
    /// `compute` is dropped without being called. For a new key, an entry is
    /// reserved and `compute` is called exactly once with a [`Settle`] handle;
    /// a nested `get_or_create` for the same key from inside `compute` sees
    /// the reserved entry.
    ///
    /// # Errors
    ///
    /// If `compute` fails synchronously the reservation is withdrawn, nothing
    /// is stored, and the error is returned.
    pub fn get_or_create<F>(&self, key: &K, compute: F) -> Result<CacheEntry<V, E>, E>
    where
        F: FnOnce(&K, Settle<V, E>) -> Result<(), E>,
    {
        if let Some(entry) = self.peek(key) {
            return Ok(entry);
        }

        let id = EntryId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let entry = CacheEntry::new(id);
        self.entries.borrow_mut().insert(key.clone(), entry.clone());
        tracing::debug!(?key, entry = id.0, "starting computation");

        let settle = Settle {
            entry: entry.clone(),
        };
        match compute(key, settle) {
            Ok(()) => {
                self.order.borrow_mut().push(key.clone());
                Ok(entry)
            }
            Err(error) => {
                tracing::debug!(?key, entry = id.0, "computation failed to start");
                self.entries.borrow_mut().remove(key);
                Err(error)
            }
        }
    }

    /// Returns the entry for `key` without creating one.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<CacheEntry<V, E>> {
        self.entries.borrow().get(key).cloned()
    }

    /// Returns `true` if an entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.borrow().len()
    }

    /// Returns `true` if no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys, in the order their computations started.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.order.borrow().clone()
    }

    /// Number of computations ever started, including ones that failed to
    /// start.
    #[must_use]
    pub fn computations_started(&self) -> u64 {
        self.next_id.get()
    }
}
