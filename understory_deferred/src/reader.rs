// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Suspending reads over the async-result cache.
//!
//! A read never blocks. It returns a tagged result, [`Read`], and when the
//! value is not available yet it hands back a [`Suspension`] token the
//! caller uses to be resumed once the computation settles.

use alloc::rc::Rc;
use core::fmt;
use core::hash::Hash;

use crate::cache::{AsyncResultCache, CacheEntry, EntryId, EntryState, Settle};

/// The computation a reader starts for a key it has not seen before.
pub type ComputeFn<K, V, E> = Rc<dyn Fn(&K, Settle<V, E>) -> Result<(), E>>;

/// Outcome of [`SuspendingReader::read`].
#[derive(Debug)]
pub enum Read<V, E> {
    /// The computation fulfilled with this value.
    Ready(V),
    /// The computation has not settled; resume via the token.
    Pending(Suspension<V, E>),
    /// The computation failed, or failed to start.
    Failed(E),
}

impl<V, E> Read<V, E> {
    /// Returns `true` for [`Read::Pending`].
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns the value of a [`Read::Ready`].
    #[must_use]
    pub fn ready(self) -> Option<V> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) | Self::Failed(_) => None,
        }
    }
}

/// A caller blocked on a pending cache entry.
///
/// The token is consumed by [`on_resume`](Self::on_resume). The registered
/// callback fires as soon as the entry settles; what the caller does then
/// (re-read immediately or later) is the caller's policy.
pub struct Suspension<V, E> {
    entry: CacheEntry<V, E>,
}

impl<V: fmt::Debug, E: fmt::Debug> fmt::Debug for Suspension<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("entry", &self.entry)
            .finish()
    }
}

impl<V, E> Suspension<V, E> {
    /// The entry the caller is blocked on.
    #[must_use]
    pub fn entry(&self) -> &CacheEntry<V, E> {
        &self.entry
    }

    /// Identity of the entry the caller is blocked on.
    #[must_use]
    pub fn entry_id(&self) -> EntryId {
        self.entry.id()
    }

    /// Registers `resume` to run once the entry settles, consuming the token.
    pub fn on_resume(self, resume: impl FnOnce() + 'static) {
        self.entry.on_settled(resume);
    }
}

/// Resolves keys to results through an [`AsyncResultCache`].
///
/// Repeated reads of a key that has not settled reuse the same entry; the
/// computation is started only by the first read.
///
/// # Example
///
/// ```
/// use core::cell::RefCell;
/// use std::rc::Rc;
/// use understory_deferred::{AsyncResultCache, Read, Settle, SuspendingReader};
///
/// let parked: Rc<RefCell<Vec<Settle<String, ()>>>> = Rc::default();
/// let sink = parked.clone();
/// let reader = SuspendingReader::new(
///     Rc::new(AsyncResultCache::new()),
///     Rc::new(move |_: &String, settle| {
///         sink.borrow_mut().push(settle);
///         Ok(())
///     }),
/// );
///
/// let key = "a".to_string();
/// let Read::Pending(token) = reader.read(&key) else { unreachable!() };
/// let resumed = Rc::new(RefCell::new(false));
/// let flag = resumed.clone();
/// token.on_resume(move || *flag.borrow_mut() = true);
///
/// parked.borrow_mut().pop().unwrap().fulfill("A".to_string());
/// assert!(*resumed.borrow());
/// assert_eq!(reader.read(&key).ready().as_deref(), Some("A"));
/// ```
pub struct SuspendingReader<K, V, E> {
    cache: Rc<AsyncResultCache<K, V, E>>,
    compute: ComputeFn<K, V, E>,
}

impl<K: fmt::Debug, V, E> fmt::Debug for SuspendingReader<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendingReader")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<K, V, E> SuspendingReader<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Creates a reader over `cache` that starts `compute` for new keys.
    #[must_use]
    pub fn new(cache: Rc<AsyncResultCache<K, V, E>>, compute: ComputeFn<K, V, E>) -> Self {
        Self { cache, compute }
    }

    /// The cache this reader consults.
    #[must_use]
    pub fn cache(&self) -> &Rc<AsyncResultCache<K, V, E>> {
        &self.cache
    }

    /// Reads the result for `key`, starting its computation if needed.
    ///
    /// A computation that fails synchronously yields [`Read::Failed`] and
    /// leaves nothing in the cache.
    pub fn read(&self, key: &K) -> Read<V, E> {
        let compute = &self.compute;
        let entry = match self.cache.get_or_create(key, |key, settle| compute(key, settle)) {
            Ok(entry) => entry,
            Err(error) => return Read::Failed(error),
        };
        match entry.state() {
            EntryState::Fulfilled(value) => Read::Ready(value),
            EntryState::Rejected(error) => Read::Failed(error),
            EntryState::Pending => Read::Pending(Suspension { entry }),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    type Parked = Rc<RefCell<Vec<Settle<String, String>>>>;

    fn parking_reader() -> (SuspendingReader<String, String, String>, Parked) {
        let parked: Parked = Rc::default();
        let sink = parked.clone();
        let reader = SuspendingReader::new(
            Rc::new(AsyncResultCache::new()),
            Rc::new(move |_: &String, settle| {
                sink.borrow_mut().push(settle);
                Ok(())
            }),
        );
        (reader, parked)
    }

    #[test]
    fn repeated_pending_reads_share_one_entry() {
        let (reader, parked) = parking_reader();
        let key = "a".to_string();

        let Read::Pending(first) = reader.read(&key) else {
            panic!("expected pending");
        };
        let Read::Pending(second) = reader.read(&key) else {
            panic!("expected pending");
        };
        assert_eq!(first.entry_id(), second.entry_id());
        assert_eq!(parked.borrow().len(), 1);
        assert_eq!(reader.cache().computations_started(), 1);
    }

    #[test]
    fn resolved_key_never_resuspends() {
        let (reader, parked) = parking_reader();
        let key = "a".to_string();
        assert!(reader.read(&key).is_pending());

        parked.borrow_mut().pop().unwrap().fulfill("A".to_string());
        for _ in 0..3 {
            assert_eq!(reader.read(&key).ready(), Some("A".to_string()));
        }
        assert_eq!(reader.cache().computations_started(), 1);
    }

    #[test]
    fn rejection_reaches_every_reader() {
        let (reader, parked) = parking_reader();
        let key = "a".to_string();
        assert!(reader.read(&key).is_pending());

        parked.borrow_mut().pop().unwrap().reject("down".to_string());
        for _ in 0..2 {
            assert!(matches!(reader.read(&key), Read::Failed(e) if e == "down"));
        }
    }

    #[test]
    fn synchronous_failure_is_not_cached() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();
        let reader: SuspendingReader<String, String, String> = SuspendingReader::new(
            Rc::new(AsyncResultCache::new()),
            Rc::new(move |key: &String, _| {
                counter.set(counter.get() + 1);
                Err(std::format!("cannot compute {key}"))
            }),
        );

        let key = "a".to_string();
        assert!(matches!(reader.read(&key), Read::Failed(_)));
        assert!(matches!(reader.read(&key), Read::Failed(_)));
        assert_eq!(attempts.get(), 2);
        assert!(reader.cache().is_empty());
    }

    #[test]
    fn resume_fires_once_per_token() {
        let (reader, parked) = parking_reader();
        let key = "a".to_string();
        let resumed = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let Read::Pending(token) = reader.read(&key) else {
                panic!("expected pending");
            };
            let resumed = resumed.clone();
            token.on_resume(move || resumed.set(resumed.get() + 1));
        }

        parked.borrow_mut().pop().unwrap().fulfill("A".to_string());
        assert_eq!(resumed.get(), 2);
    }
}
