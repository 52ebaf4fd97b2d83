// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type for session configuration and simulation.

/// Errors reported by [`Session`](crate::Session) and [`EventLoop`](crate::EventLoop).
///
/// Computation failures are not represented here: they are values of the
/// caller's error type, stored on the cache entry and handed to every reader.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A wait gave up before its condition held.
    #[error("condition not met within {timeout_ms}ms of virtual time")]
    WaitTimeout {
        /// The virtual-time budget that was exhausted, in milliseconds.
        timeout_ms: u64,
    },
    /// [`Coalescing::CommitEvery`](crate::Coalescing::CommitEvery) was given an interval of zero.
    #[error("commit interval must be at least one write")]
    ZeroCommitInterval,
}
