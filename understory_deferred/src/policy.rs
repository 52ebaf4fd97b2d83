// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Coalescing policies for deferred-value transitions.

use core::num::NonZeroU32;

use crate::error::Error;

/// How a pending transition reacts to a newer write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Retention {
    /// A newer write may supersede this transition before it commits.
    Replaceable,
    /// This transition commits even if newer writes arrive first.
    Checkpoint,
}

/// Trait for deferred-value coalescing policies.
///
/// When the scheduler observes a write it asks the policy whether the
/// resulting transition may later be superseded. Superseding is what lets a
/// burst of N writes produce fewer than N deferred commits.
///
/// # Example
///
/// ```
/// use core::num::NonZeroU32;
/// use understory_deferred::{
///     CoalescePolicy, CommitEvery, DeferredValueScheduler, LatestOnFlush, Versioned,
/// };
///
/// fn commits_for_burst<P: CoalescePolicy>(policy: P) -> usize {
///     let mut scheduler = DeferredValueScheduler::new(Versioned::initial(0_u32), policy);
///     for seq in 1..=6_u64 {
///         scheduler.observe(Versioned::new(seq as u32, understory_deferred::Seq::new(seq)));
///     }
///     let mut commits = 0;
///     while scheduler.begin_commit().is_some() {
///         commits += 1;
///         scheduler.finish_commit();
///     }
///     commits
/// }
///
/// assert_eq!(commits_for_burst(LatestOnFlush), 1);
/// assert_eq!(commits_for_burst(CommitEvery::new(NonZeroU32::new(2).unwrap())), 3);
/// ```
pub trait CoalescePolicy {
    /// Decides the retention of the transition created by the
    /// `observation`-th observed write (1-based).
    fn retention(&self, observation: u64) -> Retention;
}

/// Every pending transition may be superseded by a newer write.
///
/// A flush that arrives before the pending transition commits replaces it,
/// so the deferred value skips straight to the newest write.
#[derive(Copy, Clone, Debug, Default)]
pub struct LatestOnFlush;

impl CoalescePolicy for LatestOnFlush {
    fn retention(&self, _observation: u64) -> Retention {
        Retention::Replaceable
    }
}

/// Every `interval`-th observed write becomes a checkpoint.
///
/// Writes between checkpoints may still be superseded. An interval of one
/// commits every distinct write.
#[derive(Copy, Clone, Debug)]
pub struct CommitEvery {
    interval: NonZeroU32,
}

impl CommitEvery {
    /// Creates a policy that checkpoints every `interval`-th write.
    #[must_use]
    pub const fn new(interval: NonZeroU32) -> Self {
        Self { interval }
    }

    /// Returns the checkpoint interval.
    #[must_use]
    pub const fn interval(&self) -> NonZeroU32 {
        self.interval
    }
}

impl CoalescePolicy for CommitEvery {
    fn retention(&self, observation: u64) -> Retention {
        if observation % u64::from(self.interval.get()) == 0 {
            Retention::Checkpoint
        } else {
            Retention::Replaceable
        }
    }
}

/// Configuration form of the built-in policies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Coalescing {
    /// See [`LatestOnFlush`].
    #[default]
    LatestOnFlush,
    /// See [`CommitEvery`]. Zero is rejected by [`Coalescing::validate`].
    CommitEvery(u32),
}

impl Coalescing {
    /// Checks that the configuration describes a usable policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCommitInterval`] for `CommitEvery(0)`.
    pub fn validate(self) -> Result<(), Error> {
        match self {
            Self::CommitEvery(0) => Err(Error::ZeroCommitInterval),
            _ => Ok(()),
        }
    }
}

impl CoalescePolicy for Coalescing {
    fn retention(&self, observation: u64) -> Retention {
        match *self {
            Self::LatestOnFlush => LatestOnFlush.retention(observation),
            Self::CommitEvery(interval) => match NonZeroU32::new(interval) {
                Some(interval) => CommitEvery::new(interval).retention(observation),
                None => Retention::Checkpoint,
            },
        }
    }
}

impl<P> CoalescePolicy for &P
where
    P: CoalescePolicy + ?Sized,
{
    fn retention(&self, observation: u64) -> Retention {
        (*self).retention(observation)
    }
}
