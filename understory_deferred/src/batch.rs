// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Batching of authoritative writes into flushes.

use crate::value::Versioned;

/// The result of closing a batch, or of an unbatched write.
///
/// A flush is one scheduling opportunity for the deferred-value scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flush<T> {
    /// The last write recorded in the window.
    pub value: Versioned<T>,
    /// How many writes this flush stands for (at least one).
    pub coalesced: u64,
}

/// Groups writes made inside a batch window into a single flush.
///
/// Outside a batch every [`record`](Self::record) flushes immediately. Inside
/// one, only the last write is kept, and the outermost [`close`](Self::close)
/// flushes it. Nested windows do not flush on their own.
///
/// # Example
///
/// ```
/// use understory_deferred::{Seq, UpdateBatcher, Versioned};
///
/// let mut batcher = UpdateBatcher::new();
/// assert!(batcher.record(Versioned::new("a", Seq::new(1))).is_some());
///
/// batcher.open();
/// assert!(batcher.record(Versioned::new("ab", Seq::new(2))).is_none());
/// assert!(batcher.record(Versioned::new("abc", Seq::new(3))).is_none());
/// let flush = batcher.close().unwrap();
/// assert_eq!(flush.value.value, "abc");
/// assert_eq!(flush.coalesced, 2);
/// ```
#[derive(Clone, Debug)]
pub struct UpdateBatcher<T> {
    depth: u32,
    pending: Option<Versioned<T>>,
    coalesced: u64,
    flushes: u64,
    batches: u64,
}

impl<T> Default for UpdateBatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UpdateBatcher<T> {
    /// Creates a batcher with no open window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            depth: 0,
            pending: None,
            coalesced: 0,
            flushes: 0,
            batches: 0,
        }
    }

    /// Opens a batch window. Windows nest.
    pub fn open(&mut self) {
        if self.depth == 0 {
            self.batches += 1;
        }
        self.depth += 1;
    }

    /// Closes one window.
    ///
    /// Returns the flush when this closes the outermost window and at least
    /// one write was recorded. Closing with no window open does nothing.
    pub fn close(&mut self) -> Option<Flush<T>> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        let value = self.pending.take()?;
        let coalesced = core::mem::take(&mut self.coalesced);
        Some(self.flush(value, coalesced))
    }

    /// Records a write.
    ///
    /// Outside a window the write flushes immediately.
    pub fn record(&mut self, value: Versioned<T>) -> Option<Flush<T>> {
        if self.depth == 0 {
            return Some(self.flush(value, 1));
        }
        self.pending = Some(value);
        self.coalesced += 1;
        None
    }

    /// Returns `true` while a window is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of flushes produced so far.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Number of outermost windows opened so far.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches
    }

    fn flush(&mut self, value: Versioned<T>, coalesced: u64) -> Flush<T> {
        self.flushes += 1;
        Flush { value, coalesced }
    }
}
