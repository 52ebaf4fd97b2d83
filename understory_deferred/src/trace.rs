// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Explainability helpers for deferred transitions.
//!
//! The scheduler does not remember what happened to writes it dropped. For
//! embedders (and tests) it is often useful to answer questions like "why
//! did the deferred value never show this write?".
//!
//! This module provides an additive hook,
//! [`DeferredValueScheduler::observe_with_trace`](crate::DeferredValueScheduler::observe_with_trace)
//! and [`begin_commit_with_trace`](crate::DeferredValueScheduler::begin_commit_with_trace),
//! plus a small recorder, [`TransitionLog`], which stores the fate of every
//! observed write.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::scheduler::Commit;
use crate::value::{Seq, Versioned};

/// What happened to an observed write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Fate {
    /// The write became the deferred value.
    Committed,
    /// A newer write replaced this one before it committed.
    Superseded {
        /// The write that replaced it.
        by: Seq,
    },
    /// The deferred value was already heading to this value.
    Unchanged,
    /// The write was older than one already observed.
    Stale,
}

/// A callback sink for scheduler transitions.
pub trait TransitionTrace<T> {
    /// Called when `dropped` is replaced by the write `by`.
    fn superseded(&mut self, dropped: &Versioned<T>, by: Seq);

    /// Called when `write` needs no transition.
    fn unchanged(&mut self, write: &Versioned<T>);

    /// Called when `write` is rejected as out of order.
    fn stale(&mut self, write: &Versioned<T>);

    /// Called when a transition commits.
    fn committed(&mut self, commit: &Commit<T>);
}

/// A trace sink that ignores everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoTrace;

impl<T> TransitionTrace<T> for NoTrace {
    fn superseded(&mut self, _dropped: &Versioned<T>, _by: Seq) {}
    fn unchanged(&mut self, _write: &Versioned<T>) {}
    fn stale(&mut self, _write: &Versioned<T>) {}
    fn committed(&mut self, _commit: &Commit<T>) {}
}

/// Records the fate of every observed write.
///
/// Writes that are still pending have no fate yet.
#[derive(Clone, Debug, Default)]
pub struct TransitionLog {
    fates: HashMap<Seq, Fate>,
    commits: Vec<Seq>,
}

impl TransitionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all recorded fates.
    pub fn clear(&mut self) {
        self.fates.clear();
        self.commits.clear();
    }

    /// Returns the recorded fate of `seq`, if it has one.
    #[must_use]
    pub fn fate(&self, seq: Seq) -> Option<Fate> {
        self.fates.get(&seq).copied()
    }

    /// Sequence numbers of committed writes, in commit order.
    #[must_use]
    pub fn commits(&self) -> &[Seq] {
        &self.commits
    }

    /// Follows supersession links from `seq` to the write that absorbed it.
    ///
    /// The returned path starts at `seq` and ends at a committed or unchanged
    /// write. Returns `None` if the chain ends at a write that is still
    /// pending.
    #[must_use]
    pub fn explain(&self, seq: Seq) -> Option<Vec<Seq>> {
        let mut out = Vec::new();
        let mut seen: HashSet<Seq> = HashSet::new();

        let mut current = seq;
        loop {
            if !seen.insert(current) {
                return None;
            }
            out.push(current);

            match self.fate(current)? {
                Fate::Superseded { by } => current = by,
                Fate::Committed | Fate::Unchanged | Fate::Stale => break,
            }
        }

        Some(out)
    }
}

impl<T> TransitionTrace<T> for TransitionLog {
    fn superseded(&mut self, dropped: &Versioned<T>, by: Seq) {
        self.fates.insert(dropped.seq, Fate::Superseded { by });
    }

    fn unchanged(&mut self, write: &Versioned<T>) {
        self.fates.insert(write.seq, Fate::Unchanged);
    }

    fn stale(&mut self, write: &Versioned<T>) {
        self.fates.entry(write.seq).or_insert(Fate::Stale);
    }

    fn committed(&mut self, commit: &Commit<T>) {
        self.fates.insert(commit.value.seq, Fate::Committed);
        self.commits.push(commit.value.seq);
    }
}
