// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred-value scheduler: a coalescing state machine.

use alloc::collections::VecDeque;
use core::fmt;

use crate::policy::{CoalescePolicy, Coalescing, Retention};
use crate::trace::{NoTrace, TransitionTrace};
use crate::value::{Seq, Versioned};

/// Scheduler state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    /// No transition is pending.
    Idle,
    /// A transition is pending and a scheduling opportunity has been
    /// requested.
    CommitPending,
    /// A transition has been committed and subscribers are being notified.
    Committing,
}

/// Result of [`DeferredValueScheduler::observe`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Observed {
    /// The write is not newer than one already observed and was ignored.
    Stale,
    /// The deferred value is already heading to this value.
    Unchanged,
    /// A transition was queued; the host must schedule an opportunity.
    ScheduleOpportunity,
    /// A transition was queued; an opportunity is already scheduled or a
    /// commit is in progress.
    AlreadyScheduled,
}

/// A committed deferred-value transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit<T> {
    /// The new deferred value.
    pub value: Versioned<T>,
    /// The deferred value before this commit.
    pub previous: Versioned<T>,
}

#[derive(Clone, Debug)]
struct PendingTransition<T> {
    target: Versioned<T>,
    retention: Retention,
}

/// Produces a lagging deferred value from observed authoritative writes.
///
/// The scheduler is an explicit state machine ([`SchedulerState`]):
///
/// - [`observe`](Self::observe) queues a transition for a flushed write.
///   Depending on the [`CoalescePolicy`], the newest pending transition may
///   be superseded, so N writes can produce anywhere from one to N commits.
/// - [`begin_commit`](Self::begin_commit), called at a scheduling
///   opportunity, commits the oldest pending transition.
/// - [`finish_commit`](Self::finish_commit) ends the commit and reports
///   whether another opportunity is needed. Writes observed while
///   committing are queued, never committed recursively.
///
/// Commits are monotonic in [`Seq`]: the committed writes are a subsequence
/// of the observed writes. The scheduler performs no I/O and owns no clock;
/// the host decides when opportunities happen.
///
/// # Example
///
/// ```
/// use understory_deferred::{
///     DeferredValueScheduler, LatestOnFlush, Observed, SchedulerState, Seq, Versioned,
/// };
///
/// let mut scheduler = DeferredValueScheduler::new(Versioned::initial(""), LatestOnFlush);
///
/// assert_eq!(
///     scheduler.observe(Versioned::new("a", Seq::new(1))),
///     Observed::ScheduleOpportunity
/// );
/// // A newer write before the opportunity supersedes "a".
/// assert_eq!(
///     scheduler.observe(Versioned::new("ab", Seq::new(2))),
///     Observed::AlreadyScheduled
/// );
///
/// let commit = scheduler.begin_commit().unwrap();
/// assert_eq!(commit.value.value, "ab");
/// assert_eq!(scheduler.state(), SchedulerState::Committing);
/// assert!(!scheduler.finish_commit());
/// assert_eq!(scheduler.current().value, "ab");
/// ```
pub struct DeferredValueScheduler<T, P = Coalescing> {
    current: Versioned<T>,
    pending: VecDeque<PendingTransition<T>>,
    state: SchedulerState,
    policy: P,
    last_observed: Seq,
    observations: u64,
    commits: u64,
    holds: u32,
    refused: bool,
}

impl<T: fmt::Debug, P: fmt::Debug> fmt::Debug for DeferredValueScheduler<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValueScheduler")
            .field("current", &self.current)
            .field("pending", &self.pending)
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("commits", &self.commits)
            .finish_non_exhaustive()
    }
}

impl<T, P> DeferredValueScheduler<T, P>
where
    T: Clone + PartialEq,
    P: CoalescePolicy,
{
    /// Creates a scheduler whose deferred value starts at `initial`.
    #[must_use]
    pub fn new(initial: Versioned<T>, policy: P) -> Self {
        Self {
            last_observed: initial.seq,
            current: initial,
            pending: VecDeque::new(),
            state: SchedulerState::Idle,
            policy,
            observations: 0,
            commits: 0,
            holds: 0,
            refused: false,
        }
    }

    /// The current deferred value.
    #[must_use]
    pub fn current(&self) -> &Versioned<T> {
        &self.current
    }

    /// The value the deferred value is heading to once every pending
    /// transition commits.
    #[must_use]
    pub fn target(&self) -> &Versioned<T> {
        self.pending
            .back()
            .map_or(&self.current, |pending| &pending.target)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of transitions waiting to commit.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of writes observed, not counting stale ones.
    #[must_use]
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Number of committed transitions.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// The coalescing policy.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Returns `true` while commits are held back.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.holds > 0
    }

    /// Observes a flushed write.
    ///
    /// See [`observe_with_trace`](Self::observe_with_trace).
    pub fn observe(&mut self, write: Versioned<T>) -> Observed {
        self.observe_with_trace(write, &mut NoTrace)
    }

    /// Observes a flushed write, reporting superseded and skipped writes to
    /// `trace`.
    pub fn observe_with_trace(
        &mut self,
        write: Versioned<T>,
        trace: &mut impl TransitionTrace<T>,
    ) -> Observed {
        if write.seq <= self.last_observed {
            trace.stale(&write);
            return Observed::Stale;
        }
        self.last_observed = write.seq;
        self.observations += 1;

        if self
            .pending
            .back()
            .is_some_and(|pending| pending.retention == Retention::Replaceable)
        {
            if let Some(dropped) = self.pending.pop_back() {
                trace.superseded(&dropped.target, write.seq);
            }
        }

        if self.target().value == write.value {
            trace.unchanged(&write);
            return Observed::Unchanged;
        }

        let retention = self.policy.retention(self.observations);
        self.pending.push_back(PendingTransition {
            target: write,
            retention,
        });

        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::CommitPending;
                Observed::ScheduleOpportunity
            }
            SchedulerState::CommitPending | SchedulerState::Committing => {
                Observed::AlreadyScheduled
            }
        }
    }

    /// Commits the oldest pending transition at a scheduling opportunity.
    ///
    /// See [`begin_commit_with_trace`](Self::begin_commit_with_trace).
    pub fn begin_commit(&mut self) -> Option<Commit<T>> {
        self.begin_commit_with_trace(&mut NoTrace)
    }

    /// Commits the oldest pending transition, reporting it to `trace`.
    ///
    /// Returns `None` when no opportunity was requested, when every pending
    /// transition was superseded back to the current value, or while commits
    /// are held. A refused opportunity is remembered and reported by
    /// [`release`](Self::release).
    ///
    /// On success the scheduler is [`Committing`](SchedulerState::Committing)
    /// until [`finish_commit`](Self::finish_commit).
    pub fn begin_commit_with_trace(
        &mut self,
        trace: &mut impl TransitionTrace<T>,
    ) -> Option<Commit<T>> {
        if self.state != SchedulerState::CommitPending {
            return None;
        }
        if self.holds > 0 {
            self.refused = true;
            return None;
        }
        let Some(next) = self.pending.pop_front() else {
            self.state = SchedulerState::Idle;
            return None;
        };
        let previous = core::mem::replace(&mut self.current, next.target.clone());
        self.state = SchedulerState::Committing;
        self.commits += 1;
        let commit = Commit {
            value: next.target,
            previous,
        };
        trace.committed(&commit);
        Some(commit)
    }

    /// Ends a commit started by [`begin_commit`](Self::begin_commit).
    ///
    /// Returns `true` if transitions remain and the host must schedule
    /// another opportunity.
    pub fn finish_commit(&mut self) -> bool {
        if self.state != SchedulerState::Committing {
            return false;
        }
        if self.pending.is_empty() {
            self.state = SchedulerState::Idle;
            false
        } else {
            self.state = SchedulerState::CommitPending;
            true
        }
    }

    /// Holds back commits until a matching [`release`](Self::release).
    ///
    /// Holds nest.
    pub fn hold(&mut self) {
        self.holds += 1;
    }

    /// Releases one hold.
    ///
    /// Returns `true` if this was the last hold, an opportunity was refused
    /// while held, and a transition is still pending: the host must schedule
    /// a new opportunity.
    pub fn release(&mut self) -> bool {
        self.holds = self.holds.saturating_sub(1);
        if self.holds > 0 || !self.refused {
            return false;
        }
        self.refused = false;
        self.state == SchedulerState::CommitPending
    }
}
